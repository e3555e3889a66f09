/*!
 * System Limits and Constants
 *
 * Centralized location for timeouts, ring sizes and bytecode layout constants.
 * Organized by domain for maintainability and discoverability.
 */

use std::time::Duration;

// =============================================================================
// VERIFICATION
// =============================================================================

/// Default deadline for one verification job, measured from enqueue (60s)
/// Bulk installs may queue several jobs behind a slow one
pub const DEFAULT_VERIFICATION_TIMEOUT: Duration = Duration::from_secs(60);

/// Name of the first bytecode segment in a container
pub const PRIMARY_DEX_NAME: &str = "classes.dex";

/// Segment file name prefix and suffix (`classes.dex`, `classes2.dex`, ...)
pub const DEX_NAME_PREFIX: &str = "classes";
pub const DEX_NAME_SUFFIX: &str = ".dex";

// =============================================================================
// DEX LAYOUT
// =============================================================================

/// Size of the fixed DEX header
pub const DEX_HEADER_SIZE: usize = 0x70;

/// Little-endian tag stored in the header
pub const DEX_ENDIAN_CONSTANT: u32 = 0x1234_5678;

/// Supported DEX format versions (035 through 041)
pub const DEX_MIN_VERSION: u32 = 35;
pub const DEX_MAX_VERSION: u32 = 41;

/// Size in bytes of one entry in each id table
pub const STRING_ID_ITEM_SIZE: usize = 4;
pub const TYPE_ID_ITEM_SIZE: usize = 4;
pub const PROTO_ID_ITEM_SIZE: usize = 12;
pub const FIELD_ID_ITEM_SIZE: usize = 8;
pub const METHOD_ID_ITEM_SIZE: usize = 8;
pub const CLASS_DEF_ITEM_SIZE: usize = 32;

// =============================================================================
// SESSIONS
// =============================================================================

/// Default deadline for a surface package request (10s)
pub const DEFAULT_SURFACE_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// RESTRICTIONS
// =============================================================================

/// Maximum restriction decisions kept in the global audit ring
pub const MAX_AUDIT_EVENTS: usize = 1000;

/// Maximum restriction decisions kept per uid
pub const MAX_AUDIT_EVENTS_PER_UID: usize = 100;

/// Device config namespace holding the restriction properties
pub const DEFAULT_PROPERTY_NAMESPACE: &str = "adservices";
