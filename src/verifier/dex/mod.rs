/*!
 * DEX Bytecode
 * Minimal reader for the id tables of a DEX segment
 */

mod format;
mod parser;
mod symbols;

pub use format::{decode_mutf8, descriptor_to_java, DexFile, DexHeader, Section};
pub use parser::DexReader;
pub use symbols::{DexSymbols, FieldRef, MethodRef};
