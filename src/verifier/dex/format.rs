/*!
 * DEX Format
 *
 * Header validation, id table access and descriptor rendering. Only the
 * tables needed to enumerate referenced symbols are read: strings, types,
 * prototypes, field ids, method ids and class definitions.
 */

use super::parser::DexReader;
use super::symbols::{DexSymbols, FieldRef, MethodRef};
use crate::core::errors::{SandboxError, SandboxResult};
use crate::core::limits::{
    CLASS_DEF_ITEM_SIZE, DEX_ENDIAN_CONSTANT, DEX_HEADER_SIZE, DEX_MAX_VERSION, DEX_MIN_VERSION,
    FIELD_ID_ITEM_SIZE, METHOD_ID_ITEM_SIZE, PROTO_ID_ITEM_SIZE, STRING_ID_ITEM_SIZE,
    TYPE_ID_ITEM_SIZE,
};
use ahash::AHashSet;

const DEX_MAGIC_PREFIX: &[u8; 4] = b"dex\n";
const NO_INDEX: u32 = 0;

/// Location of one id table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Section {
    pub size: u32,
    pub offset: u32,
}

impl Section {
    fn item_offset(&self, index: u32, item_size: usize, what: &str) -> SandboxResult<usize> {
        if index >= self.size {
            return Err(SandboxError::CorruptFormat(format!(
                "{} index {} out of range ({} entries)",
                what, index, self.size
            )));
        }
        Ok(self.offset as usize + index as usize * item_size)
    }
}

/// Validated DEX header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DexHeader {
    pub version: u32,
    pub file_size: u32,
    pub string_ids: Section,
    pub type_ids: Section,
    pub proto_ids: Section,
    pub field_ids: Section,
    pub method_ids: Section,
    pub class_defs: Section,
}

impl DexHeader {
    pub fn parse(data: &[u8]) -> SandboxResult<Self> {
        if data.len() < DEX_HEADER_SIZE {
            return Err(SandboxError::CorruptFormat(format!(
                "image is {} bytes, shorter than the {} byte header",
                data.len(),
                DEX_HEADER_SIZE
            )));
        }

        let mut reader = DexReader::new(data);
        let magic = reader.read_bytes(8)?;
        let version = parse_magic(magic)?;

        reader.seek(32)?;
        let file_size = reader.read_u32()?;
        let header_size = reader.read_u32()?;
        let endian_tag = reader.read_u32()?;

        if header_size as usize != DEX_HEADER_SIZE {
            return Err(SandboxError::CorruptFormat(format!(
                "unexpected header size {:#x}",
                header_size
            )));
        }
        if endian_tag != DEX_ENDIAN_CONSTANT {
            return Err(SandboxError::CorruptFormat(format!(
                "unsupported endian tag {:#x}",
                endian_tag
            )));
        }
        if file_size as usize > data.len() {
            return Err(SandboxError::CorruptFormat(format!(
                "header declares {} bytes but image has {}",
                file_size,
                data.len()
            )));
        }

        reader.seek(56)?;
        let mut section = || -> SandboxResult<Section> {
            Ok(Section {
                size: reader.read_u32()?,
                offset: reader.read_u32()?,
            })
        };
        let header = Self {
            version,
            file_size,
            string_ids: section()?,
            type_ids: section()?,
            proto_ids: section()?,
            field_ids: section()?,
            method_ids: section()?,
            class_defs: section()?,
        };

        let limit = file_size as usize;
        check_table(&header.string_ids, STRING_ID_ITEM_SIZE, limit, "string_ids")?;
        check_table(&header.type_ids, TYPE_ID_ITEM_SIZE, limit, "type_ids")?;
        check_table(&header.proto_ids, PROTO_ID_ITEM_SIZE, limit, "proto_ids")?;
        check_table(&header.field_ids, FIELD_ID_ITEM_SIZE, limit, "field_ids")?;
        check_table(&header.method_ids, METHOD_ID_ITEM_SIZE, limit, "method_ids")?;
        check_table(&header.class_defs, CLASS_DEF_ITEM_SIZE, limit, "class_defs")?;

        Ok(header)
    }
}

fn parse_magic(magic: &[u8]) -> SandboxResult<u32> {
    let bad_magic = || SandboxError::CorruptFormat("not a DEX image (bad magic)".to_string());

    if &magic[..4] != DEX_MAGIC_PREFIX || magic[7] != 0 {
        return Err(bad_magic());
    }
    let digits = &magic[4..7];
    if !digits.iter().all(u8::is_ascii_digit) {
        return Err(bad_magic());
    }
    let version = digits
        .iter()
        .fold(0u32, |acc, digit| acc * 10 + u32::from(digit - b'0'));
    if !(DEX_MIN_VERSION..=DEX_MAX_VERSION).contains(&version) {
        return Err(SandboxError::CorruptFormat(format!(
            "unsupported DEX version {:03}",
            version
        )));
    }
    Ok(version)
}

fn check_table(section: &Section, item_size: usize, limit: usize, name: &str) -> SandboxResult<()> {
    if section.size == 0 {
        return Ok(());
    }
    let end = (section.offset as u64) + (section.size as u64) * (item_size as u64);
    if (section.offset as usize) < DEX_HEADER_SIZE || end > limit as u64 {
        return Err(SandboxError::CorruptFormat(format!(
            "{} table ({} entries at {:#x}) lies outside the image",
            name, section.size, section.offset
        )));
    }
    Ok(())
}

/// A parsed DEX image borrowing its bytes
pub struct DexFile<'a> {
    data: &'a [u8],
    header: DexHeader,
}

impl<'a> DexFile<'a> {
    pub fn parse(data: &'a [u8]) -> SandboxResult<Self> {
        let header = DexHeader::parse(data)?;
        Ok(Self { data, header })
    }

    pub fn header(&self) -> &DexHeader {
        &self.header
    }

    /// Decoded string for a string id
    pub fn string(&self, index: u32) -> SandboxResult<String> {
        let offset = self
            .header
            .string_ids
            .item_offset(index, STRING_ID_ITEM_SIZE, "string")?;
        let data_offset = DexReader::at(self.data, offset)?.read_u32()? as usize;

        let mut reader = DexReader::at(self.data, data_offset)?;
        let utf16_len = reader.read_uleb128()? as usize;
        let bytes = reader.read_until_nul()?;
        let decoded = decode_mutf8(bytes)?;
        if decoded.encode_utf16().count() != utf16_len {
            return Err(SandboxError::CorruptFormat(format!(
                "string {} length does not match its header",
                index
            )));
        }
        Ok(decoded)
    }

    /// Raw type descriptor for a type id, e.g. `Landroid/os/Bundle;`
    pub fn type_descriptor(&self, index: u32) -> SandboxResult<String> {
        let offset = self
            .header
            .type_ids
            .item_offset(index, TYPE_ID_ITEM_SIZE, "type")?;
        let string_index = DexReader::at(self.data, offset)?.read_u32()?;
        self.string(string_index)
    }

    /// Java name for a type id
    pub fn type_name(&self, index: u32) -> SandboxResult<String> {
        descriptor_to_java(&self.type_descriptor(index)?)
    }

    /// (parameter type names, return type name) for a prototype id
    pub fn prototype(&self, index: u32) -> SandboxResult<(Vec<String>, String)> {
        let offset = self
            .header
            .proto_ids
            .item_offset(index, PROTO_ID_ITEM_SIZE, "proto")?;
        let mut reader = DexReader::at(self.data, offset)?;
        let _shorty = reader.read_u32()?;
        let return_type = self.type_name(reader.read_u32()?)?;
        let parameters_off = reader.read_u32()?;

        let mut parameters = Vec::new();
        if parameters_off != NO_INDEX {
            let mut list = DexReader::at(self.data, parameters_off as usize)?;
            let count = list.read_u32()?;
            for _ in 0..count {
                let type_index = list.read_u16()?;
                parameters.push(self.type_name(u32::from(type_index))?);
            }
        }
        Ok((parameters, return_type))
    }

    /// Type ids of every class defined in this image
    pub fn defined_classes(&self) -> SandboxResult<AHashSet<u32>> {
        let mut defined = AHashSet::with_capacity(self.header.class_defs.size as usize);
        for index in 0..self.header.class_defs.size {
            let offset = self
                .header
                .class_defs
                .item_offset(index, CLASS_DEF_ITEM_SIZE, "class_def")?;
            defined.insert(DexReader::at(self.data, offset)?.read_u32()?);
        }
        Ok(defined)
    }

    /// Add every method and field whose declaring class is defined elsewhere
    pub fn collect_external_symbols(&self, symbols: &mut DexSymbols) -> SandboxResult<()> {
        let defined = self.defined_classes()?;

        for index in 0..self.header.method_ids.size {
            let offset = self
                .header
                .method_ids
                .item_offset(index, METHOD_ID_ITEM_SIZE, "method")?;
            let mut reader = DexReader::at(self.data, offset)?;
            let class_index = u32::from(reader.read_u16()?);
            let proto_index = u32::from(reader.read_u16()?);
            let name_index = reader.read_u32()?;

            if defined.contains(&class_index) {
                continue;
            }
            let descriptor = self.type_descriptor(class_index)?;
            // Array pseudo-classes only expose Object methods
            if descriptor.starts_with('[') {
                continue;
            }
            let (parameters, return_type) = self.prototype(proto_index)?;
            symbols.add_method(MethodRef {
                class: descriptor_to_java(&descriptor)?,
                name: self.string(name_index)?,
                parameters,
                return_type,
            });
        }

        for index in 0..self.header.field_ids.size {
            let offset = self
                .header
                .field_ids
                .item_offset(index, FIELD_ID_ITEM_SIZE, "field")?;
            let mut reader = DexReader::at(self.data, offset)?;
            let class_index = u32::from(reader.read_u16()?);
            let type_index = u32::from(reader.read_u16()?);
            let name_index = reader.read_u32()?;

            if defined.contains(&class_index) {
                continue;
            }
            symbols.add_field(FieldRef {
                class: self.type_name(class_index)?,
                name: self.string(name_index)?,
                field_type: self.type_name(type_index)?,
            });
        }

        Ok(())
    }
}

/// Decode Modified UTF-8 (two-byte NUL, surrogate pairs as separate units)
pub fn decode_mutf8(bytes: &[u8]) -> SandboxResult<String> {
    let invalid = |offset: usize| {
        SandboxError::CorruptFormat(format!("invalid MUTF-8 sequence at byte {}", offset))
    };
    let continuation = |index: usize| -> SandboxResult<u16> {
        match bytes.get(index) {
            Some(byte) if byte & 0xc0 == 0x80 => Ok(u16::from(byte & 0x3f)),
            _ => Err(invalid(index)),
        }
    };

    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut index = 0;
    while index < bytes.len() {
        let lead = bytes[index];
        if lead & 0x80 == 0 {
            units.push(u16::from(lead));
            index += 1;
        } else if lead & 0xe0 == 0xc0 {
            units.push((u16::from(lead & 0x1f) << 6) | continuation(index + 1)?);
            index += 2;
        } else if lead & 0xf0 == 0xe0 {
            units.push(
                (u16::from(lead & 0x0f) << 12)
                    | (continuation(index + 1)? << 6)
                    | continuation(index + 2)?,
            );
            index += 3;
        } else {
            return Err(invalid(index));
        }
    }

    String::from_utf16(&units).map_err(|_| {
        SandboxError::CorruptFormat("string contains an unpaired surrogate".to_string())
    })
}

/// Render a type descriptor the way Java source spells it
///
/// `I` becomes `int`, `Ljava/lang/String;` becomes `java.lang.String` and
/// each leading `[` adds a `[]` suffix.
pub fn descriptor_to_java(descriptor: &str) -> SandboxResult<String> {
    let dimensions = descriptor.bytes().take_while(|b| *b == b'[').count();
    let base = &descriptor[dimensions..];

    let mut name = match base {
        "V" if dimensions == 0 => "void".to_string(),
        "Z" => "boolean".to_string(),
        "B" => "byte".to_string(),
        "S" => "short".to_string(),
        "C" => "char".to_string(),
        "I" => "int".to_string(),
        "J" => "long".to_string(),
        "F" => "float".to_string(),
        "D" => "double".to_string(),
        class if class.len() > 2 && class.starts_with('L') && class.ends_with(';') => {
            class[1..class.len() - 1].replace('/', ".")
        }
        _ => {
            return Err(SandboxError::CorruptFormat(format!(
                "invalid type descriptor {:?}",
                descriptor
            )))
        }
    };
    for _ in 0..dimensions {
        name.push_str("[]");
    }
    Ok(name)
}
