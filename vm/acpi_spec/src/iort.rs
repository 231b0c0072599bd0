// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! I/O Remapping Table (IORT).
//!
//! Only SMMUv1/v2 nodes are consumed; the node stream is otherwise
//! skipped by declared length.

use crate::packed_nums::*;
use crate::Header;
use crate::ParseError;
use crate::Table;
use core::mem::size_of;
use static_assertions::const_assert_eq;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;

#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, Immutable, KnownLayout, FromBytes, Unaligned)]
pub struct Iort {
    pub node_cnt: u32_le,
    pub node_off: u32_le,
    pub rsvd: u32_le,
}

const_assert_eq!(size_of::<Iort>(), 12);

impl Table for Iort {
    const SIGNATURE: [u8; 4] = *b"IORT";
    const MIN_LENGTH: u32 = 48;
}

open_enum::open_enum! {
    #[derive(IntoBytes, Immutable, KnownLayout, FromBytes, Unaligned)]
    pub enum NodeType: u8 {
        ITS_GROUP       = 0,
        NAMED_COMPONENT = 1,
        ROOT_COMPLEX    = 2,
        SMMU_V1V2       = 3,
        SMMU_V3         = 4,
        PMCG            = 5,
        MEM_RANGE       = 6,
    }
}

/// Common node header.
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, Immutable, KnownLayout, FromBytes, Unaligned)]
pub struct Node {
    pub typ: NodeType,
    pub length: u16_le,
    pub revision: u8,
    pub rsvd: u16_le,
    pub id: u16_le,
    pub mapping_cnt: u32_le,
    pub mapping_off: u32_le,
}

const_assert_eq!(size_of::<Node>(), 16);

/// SMMUv1/v2 node body (follows the common header).
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, Immutable, KnownLayout, FromBytes, Unaligned)]
pub struct SmmuNode {
    pub base: u64_le,
    pub span: u64_le,
    pub model: u32_le,
    pub flags: u32_le,
    pub glb_int_off: u32_le,
    pub ctx_int_cnt: u32_le,
    pub ctx_int_off: u32_le,
}

const_assert_eq!(size_of::<SmmuNode>(), 32);

/// Parses a full IORT (header included), yielding each SMMUv1/v2 node.
pub fn parse_iort<'a>(
    bytes: &'a [u8],
    mut on_smmu: impl FnMut(&'a Node, &'a SmmuNode),
) -> Result<&'a Header, ParseError> {
    let (header, fixed, _) = crate::table_body::<Iort>(bytes)?;
    let len = header.length.get() as usize;
    let mut off = fixed.node_off.get() as usize;

    while off < len {
        let entry = &bytes[off..len];
        let Ok((node, body)) = Node::ref_from_prefix(entry) else {
            break;
        };
        let nlen = node.length.get() as usize;
        if nlen < size_of::<Node>() || nlen > entry.len() {
            break;
        }
        if node.typ == NodeType::SMMU_V1V2 {
            if let Ok((smmu, _)) = SmmuNode::ref_from_prefix(body) {
                on_smmu(node, smmu);
            }
        }
        off += nlen;
    }
    Ok(header)
}
