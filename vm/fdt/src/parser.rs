// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Code to parse a Flattened DeviceTree binary blob.

use super::spec;
use super::spec::U32b;
use super::spec::U64b;
use core::fmt::Display;
use core::mem::size_of;
use zerocopy::FromBytes;

/// Errors returned when parsing a FDT.
#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    /// Buffer too small for the fixed header.
    NoHeader,
    /// Fixed header magic invalid.
    HeaderMagic,
    /// Total size described in the fixed header exceeds the buffer.
    HeaderTotalSize,
    /// Header version is not supported.
    HeaderVersion,
    /// Structure block not contained within the buffer.
    StructureBlock,
    /// Strings block not contained within the buffer.
    StringsBlock,
    /// No root node present.
    RootNode,
    /// Unexpected or unparsable token in the structure block.
    Token(u32),
    /// A string in the blob is unterminated or not UTF-8.
    BadString,
    /// Property data shorter than the requested typed read.
    PropertyData,
}

impl Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::NoHeader => f.write_str("buffer too small for fixed FDT header"),
            Error::HeaderMagic => f.write_str("FDT header magic invalid"),
            Error::HeaderTotalSize => f.write_str("FDT total size exceeds buffer"),
            Error::HeaderVersion => f.write_str("FDT header version unsupported"),
            Error::StructureBlock => f.write_str("structure block out of bounds"),
            Error::StringsBlock => f.write_str("strings block out of bounds"),
            Error::RootNode => f.write_str("no root node"),
            Error::Token(t) => write!(f, "unexpected FDT token {t}"),
            Error::BadString => f.write_str("unterminated or non-UTF-8 string"),
            Error::PropertyData => f.write_str("property data too short"),
        }
    }
}

impl core::error::Error for Error {}

/// A parser over a validated FDT blob.
pub struct Parser<'a> {
    /// Total size declared by the header.
    pub total_size: usize,
    /// The `boot_cpuid_phys` header field: the firmware id of the CPU
    /// the blob was handed over on.
    pub boot_cpuid_phys: u32,
    strings_block: &'a [u8],
    structure_block: &'a [u8],
}

impl<'a> Parser<'a> {
    /// Validates the header magic, version and block bounds.
    pub fn new(buf: &'a [u8]) -> Result<Self, Error> {
        let header = spec::Header::ref_from_prefix(buf)
            .map_err(|_| Error::NoHeader)?
            .0;

        if header.magic.get() != spec::MAGIC {
            return Err(Error::HeaderMagic);
        }

        let total_size = header.totalsize.get() as usize;
        if total_size > buf.len() {
            return Err(Error::HeaderTotalSize);
        }

        if header.version.get() < spec::CURRENT_VERSION
            || header.last_comp_version.get() > spec::COMPAT_VERSION
        {
            return Err(Error::HeaderVersion);
        }

        let struct_off = header.off_dt_struct.get() as usize;
        let struct_len = header.size_dt_struct.get() as usize;
        let structure_block = buf
            .get(struct_off..struct_off.checked_add(struct_len).ok_or(Error::StructureBlock)?)
            .ok_or(Error::StructureBlock)?;

        let strings_off = header.off_dt_strings.get() as usize;
        let strings_len = header.size_dt_strings.get() as usize;
        let strings_block = buf
            .get(strings_off..strings_off.checked_add(strings_len).ok_or(Error::StringsBlock)?)
            .ok_or(Error::StringsBlock)?;

        Ok(Self {
            total_size,
            boot_cpuid_phys: header.boot_cpuid_phys.get(),
            strings_block,
            structure_block,
        })
    }

    /// Returns the root node.
    pub fn root(&self) -> Result<Node<'a>, Error> {
        NodeIter {
            strings_block: self.strings_block,
            nodes: self.structure_block,
        }
        .next()
        .ok_or(Error::RootNode)?
    }
}

enum Token<'a> {
    BeginNode { name: &'a str },
    Property { name_offset: u32, data: &'a [u8] },
    EndNode,
    Nop,
    End,
}

/// Reads the next token, returning it and the remaining buffer.
fn read_token(buf: &[u8]) -> Result<(Token<'_>, &[u8]), Error> {
    let (token, rest) = U32b::read_from_prefix(buf).map_err(|_| Error::Token(0))?;
    match token.get() {
        spec::BEGIN_NODE => {
            let name = str_from_bytes(rest)?;
            // Name plus terminator, padded to the next 4-byte boundary.
            let skip = (name.len() + 1 + 3) & !3;
            let rest = rest.get(skip..).ok_or(Error::BadString)?;
            Ok((Token::BeginNode { name }, rest))
        }
        spec::PROP => {
            let (header, rest) =
                spec::PropHeader::read_from_prefix(rest).map_err(|_| Error::PropertyData)?;
            let len = header.len.get() as usize;
            let padded = (len + 3) & !3;
            if padded > rest.len() {
                return Err(Error::PropertyData);
            }
            Ok((
                Token::Property {
                    name_offset: header.nameoff.get(),
                    data: &rest[..len],
                },
                &rest[padded..],
            ))
        }
        spec::END_NODE => Ok((Token::EndNode, rest)),
        spec::NOP => Ok((Token::Nop, rest)),
        spec::END => Ok((Token::End, rest)),
        t => Err(Error::Token(t)),
    }
}

/// An iterator over sibling nodes.
pub struct NodeIter<'a> {
    strings_block: &'a [u8],
    nodes: &'a [u8],
}

impl<'a> NodeIter<'a> {
    fn parse(&mut self) -> Result<Option<Node<'a>>, Error> {
        loop {
            if self.nodes.is_empty() {
                return Ok(None);
            }
            let (token, rest) = read_token(self.nodes)?;
            let name = match token {
                Token::Nop => {
                    self.nodes = rest;
                    continue;
                }
                Token::End | Token::EndNode => return Ok(None),
                Token::BeginNode { name } => name,
                Token::Property { .. } => return Err(Error::Token(spec::PROP)),
            };
            self.nodes = rest;

            // Properties precede children.
            let mut cursor = self.nodes;
            loop {
                let (token, rest) = read_token(cursor)?;
                match token {
                    Token::Property { .. } | Token::Nop => cursor = rest,
                    _ => break,
                }
            }
            let (properties, rest) = self.nodes.split_at(self.nodes.len() - cursor.len());
            self.nodes = rest;

            // Scan to the matching END_NODE, counting nesting.
            let mut cursor = self.nodes;
            let mut depth = 0u32;
            loop {
                let (token, rest) = read_token(cursor)?;
                match token {
                    Token::EndNode if depth == 0 => break,
                    Token::EndNode => depth -= 1,
                    Token::BeginNode { .. } => depth += 1,
                    Token::Property { .. } | Token::Nop => {}
                    Token::End => return Err(Error::Token(spec::END)),
                }
                cursor = rest;
            }
            let (children, rest) = self.nodes.split_at(self.nodes.len() - cursor.len());

            // Consume the END_NODE.
            let (_, rest) = read_token(rest)?;
            self.nodes = rest;

            return Ok(Some(Node {
                name,
                strings_block: self.strings_block,
                properties,
                children,
            }));
        }
    }
}

impl<'a> Iterator for NodeIter<'a> {
    type Item = Result<Node<'a>, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        self.parse().transpose()
    }
}

/// A parsed FDT node.
pub struct Node<'a> {
    /// Node name, unit address included.
    pub name: &'a str,
    strings_block: &'a [u8],
    properties: &'a [u8],
    children: &'a [u8],
}

impl<'a> Node<'a> {
    /// The node name without its unit address.
    pub fn base_name(&self) -> &'a str {
        self.name.split('@').next().unwrap_or(self.name)
    }

    /// Iterates the children of this node.
    pub fn children(&self) -> NodeIter<'a> {
        NodeIter {
            strings_block: self.strings_block,
            nodes: self.children,
        }
    }

    /// Iterates the properties of this node.
    pub fn properties(&self) -> PropertyIter<'a> {
        PropertyIter {
            strings_block: self.strings_block,
            properties: self.properties,
        }
    }

    /// Finds a property by name. Linear in the property count.
    pub fn find_property(&self, name: &str) -> Result<Option<Property<'a>>, Error> {
        for prop in self.properties() {
            let prop = prop?;
            if prop.name == name {
                return Ok(Some(prop));
            }
        }
        Ok(None)
    }

    /// Whether the node's `compatible` string list contains `what`.
    pub fn is_compatible(&self, what: &str) -> bool {
        matches!(
            self.find_property("compatible"),
            Ok(Some(prop)) if prop.string_list().any(|s| s == what)
        )
    }
}

/// An iterator over node properties.
pub struct PropertyIter<'a> {
    strings_block: &'a [u8],
    properties: &'a [u8],
}

impl<'a> Iterator for PropertyIter<'a> {
    type Item = Result<Property<'a>, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.properties.is_empty() {
                return None;
            }
            let (token, rest) = match read_token(self.properties) {
                Ok(x) => x,
                Err(e) => {
                    self.properties = &[];
                    return Some(Err(e));
                }
            };
            self.properties = rest;
            match token {
                Token::Nop => continue,
                Token::Property { name_offset, data } => {
                    let name = match self
                        .strings_block
                        .get(name_offset as usize..)
                        .ok_or(Error::BadString)
                        .and_then(str_from_bytes)
                    {
                        Ok(name) => name,
                        Err(e) => return Some(Err(e)),
                    };
                    return Some(Ok(Property { name, data }));
                }
                _ => return Some(Err(Error::Token(0))),
            }
        }
    }
}

/// A parsed node property.
pub struct Property<'a> {
    /// Property name.
    pub name: &'a str,
    /// Raw big-endian data.
    pub data: &'a [u8],
}

impl<'a> Property<'a> {
    /// Reads the big-endian u32 at cell index `index`.
    pub fn read_u32(&self, index: usize) -> Result<u32, Error> {
        let off = index * size_of::<u32>();
        let cell = self.data.get(off..off + 4).ok_or(Error::PropertyData)?;
        Ok(u32::from_be_bytes(cell.try_into().unwrap()))
    }

    /// Reads the big-endian u64 at u64 index `index`.
    pub fn read_u64(&self, index: usize) -> Result<u64, Error> {
        let off = index * size_of::<u64>();
        let cell = self.data.get(off..off + 8).ok_or(Error::PropertyData)?;
        Ok(u64::from_be_bytes(cell.try_into().unwrap()))
    }

    /// Reads a value of `cells` 32-bit cells starting at cell `index`,
    /// the access pattern for `#address-cells`-sized fields.
    pub fn read_cells(&self, index: usize, cells: u32) -> Result<u64, Error> {
        match cells {
            1 => self.read_u32(index).map(u64::from),
            2 => {
                let hi = self.read_u32(index)?;
                let lo = self.read_u32(index + 1)?;
                Ok((hi as u64) << 32 | lo as u64)
            }
            _ => Err(Error::PropertyData),
        }
    }

    /// Reads the data as a single string.
    pub fn read_str(&self) -> Result<&'a str, Error> {
        str_from_bytes(self.data)
    }

    /// Iterates a `\0`-separated string list, the `compatible` format.
    pub fn string_list(&self) -> impl Iterator<Item = &'a str> {
        self.data
            .split(|&b| b == 0)
            .filter(|s| !s.is_empty())
            .filter_map(|s| core::str::from_utf8(s).ok())
    }

    /// Reads the big-endian u64 sequence spanning the whole property.
    pub fn as_u64_list(&self) -> Result<impl Iterator<Item = u64> + use<'a>, Error> {
        let list = <[U64b]>::ref_from_bytes(self.data).map_err(|_| Error::PropertyData)?;
        Ok(list.iter().map(|v| v.get()))
    }
}

/// Extracts a NUL-terminated UTF-8 string.
fn str_from_bytes(bytes: &[u8]) -> Result<&str, Error> {
    let nul = bytes.iter().position(|&b| b == 0).ok_or(Error::BadString)?;
    core::str::from_utf8(&bytes[..nul]).map_err(|_| Error::BadString)
}

#[cfg(test)]
mod tests {
    extern crate alloc;

    use super::*;
    use alloc::vec::Vec;

    /// Minimal blob builder for tests: nodes with u32/u64/string props.
    struct Blob {
        structs: Vec<u8>,
        strings: Vec<u8>,
    }

    impl Blob {
        fn new() -> Self {
            Blob {
                structs: Vec::new(),
                strings: Vec::new(),
            }
        }

        fn string_off(&mut self, s: &str) -> u32 {
            let off = self.strings.len() as u32;
            self.strings.extend_from_slice(s.as_bytes());
            self.strings.push(0);
            off
        }

        fn begin(&mut self, name: &str) -> &mut Self {
            self.structs.extend_from_slice(&spec::BEGIN_NODE.to_be_bytes());
            self.structs.extend_from_slice(name.as_bytes());
            self.structs.push(0);
            while self.structs.len() % 4 != 0 {
                self.structs.push(0);
            }
            self
        }

        fn end(&mut self) -> &mut Self {
            self.structs.extend_from_slice(&spec::END_NODE.to_be_bytes());
            self
        }

        fn prop(&mut self, name: &str, data: &[u8]) -> &mut Self {
            let off = self.string_off(name);
            self.structs.extend_from_slice(&spec::PROP.to_be_bytes());
            self.structs.extend_from_slice(&(data.len() as u32).to_be_bytes());
            self.structs.extend_from_slice(&off.to_be_bytes());
            self.structs.extend_from_slice(data);
            while self.structs.len() % 4 != 0 {
                self.structs.push(0);
            }
            self
        }

        fn finish(mut self, boot_cpu: u32) -> Vec<u8> {
            self.structs.extend_from_slice(&spec::END.to_be_bytes());
            let header_len = size_of::<spec::Header>();
            let total = header_len + self.structs.len() + self.strings.len();
            let mut blob = Vec::with_capacity(total);
            let push32 = |blob: &mut Vec<u8>, v: u32| blob.extend_from_slice(&v.to_be_bytes());
            push32(&mut blob, spec::MAGIC);
            push32(&mut blob, total as u32);
            push32(&mut blob, header_len as u32); // off_dt_struct
            push32(&mut blob, (header_len + self.structs.len()) as u32); // off_dt_strings
            push32(&mut blob, total as u32); // off_mem_rsvmap (empty)
            push32(&mut blob, spec::CURRENT_VERSION);
            push32(&mut blob, spec::COMPAT_VERSION);
            push32(&mut blob, boot_cpu);
            push32(&mut blob, self.strings.len() as u32);
            push32(&mut blob, self.structs.len() as u32);
            blob.extend_from_slice(&self.structs);
            blob.extend_from_slice(&self.strings);
            blob
        }
    }

    fn cpus_blob() -> Vec<u8> {
        let mut b = Blob::new();
        b.begin(""); // root
        b.prop("compatible", b"linux,dummy-virt\0");
        b.begin("cpus");
        b.prop("#address-cells", &2u32.to_be_bytes());
        b.prop("#size-cells", &0u32.to_be_bytes());
        for i in 0..2u64 {
            b.begin(if i == 0 { "cpu@0" } else { "cpu@100" });
            b.prop("device_type", b"cpu\0");
            b.prop("reg", &(i * 0x100).to_be_bytes());
            b.end();
        }
        b.end(); // cpus
        b.begin("intc@8000000");
        b.prop("compatible", b"arm,gic-v3\0");
        b.end();
        b.end(); // root
        b.finish(0)
    }

    #[test]
    fn header_rejects_garbage() {
        assert_eq!(Parser::new(&[0u8; 16]).unwrap_err(), Error::NoHeader);
        let mut blob = cpus_blob();
        blob[0] ^= 0xff;
        assert_eq!(Parser::new(&blob).unwrap_err(), Error::HeaderMagic);
    }

    #[test]
    fn walk_cpus() {
        let blob = cpus_blob();
        let parser = Parser::new(&blob).unwrap();
        let root = parser.root().unwrap();
        assert!(root.is_compatible("linux,dummy-virt"));

        let mut mpidrs = Vec::new();
        for child in root.children() {
            let child = child.unwrap();
            if child.base_name() == "cpus" {
                let cells = child
                    .find_property("#address-cells")
                    .unwrap()
                    .unwrap()
                    .read_u32(0)
                    .unwrap();
                assert_eq!(cells, 2);
                for cpu in child.children() {
                    let cpu = cpu.unwrap();
                    let reg = cpu.find_property("reg").unwrap().unwrap();
                    mpidrs.push(reg.read_cells(0, cells).unwrap());
                }
            }
        }
        assert_eq!(mpidrs, [0, 0x100]);
    }

    #[test]
    fn find_gic() {
        let blob = cpus_blob();
        let parser = Parser::new(&blob).unwrap();
        let root = parser.root().unwrap();
        let gic = root
            .children()
            .filter_map(Result::ok)
            .find(|n| n.is_compatible("arm,gic-v3"));
        assert!(gic.is_some());
    }
}
