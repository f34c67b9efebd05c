//! Binary snapshot format for [`HnswGraph`].
//!
//! Layout (little-endian):
//!
//! ```text
//! header   magic "VCNH" | version u32 | dim u32 | metric u8 | M u32
//!          | ef_construction u32 | ef u32 | seed u64 | allow_replace u8
//!          | entry i64 (-1 = none) | max_level u32 | count u64
//!          | deleted u64 | next_label u64
//! node*    label u64 | deleted u8 | level u32
//!          | (len u32, ids u32*) per layer 0..=level | vector f32*dim
//! trailer  crc32 of all preceding bytes
//! ```

use std::io::{Read, Write};
use std::sync::atomic::Ordering;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use super::graph::{EntryPoint, HnswGraph, NodeId};
use crate::error::{Result, VicinityError};
use crate::vector::core::distance::{DistanceMetric, MetricSpace};
use crate::vector::index::io::{
    ChecksumReader, ChecksumWriter, read_f32_vec, read_id_list, truncated, write_f32_slice,
    write_id_list,
};

pub const MAGIC: &[u8; 4] = b"VCNH";
pub const FORMAT_VERSION: u32 = 1;

/// Levels above this cannot come out of the level sampler.
const MAX_LEVEL: usize = 64;

/// Fixed bytes of the header, magic included, trailer excluded.
const HEADER_LEN: u64 = 4 + 4 + 4 + 1 + 4 + 4 + 4 + 8 + 1 + 8 + 4 + 8 + 8 + 8;

/// Parameters recovered from a snapshot header.
#[derive(Debug, Clone, Copy)]
struct Header {
    m: usize,
    ef_construction: usize,
    ef: usize,
    seed: u64,
    entry: Option<NodeId>,
    max_level: usize,
    count: usize,
    deleted: usize,
    next_label: u64,
}

impl HnswGraph {
    /// Serialize the graph plus the owner's auto-label counter.
    pub(crate) fn write_to<W: Write>(&self, output: W, next_label: u64) -> Result<W> {
        let mut out = ChecksumWriter::new(output);
        // Tombstone toggles and slot claims wait until the snapshot is written.
        let _lookup = self.label_lookup.lock();
        let EntryPoint { node, max_level } = *self.entry.lock();
        let count = self.len();
        let tombstones: Vec<bool> = self.nodes[..count]
            .iter()
            .map(|node| node.deleted.load(Ordering::Acquire))
            .collect();
        let deleted = tombstones.iter().filter(|&&deleted| deleted).count();

        out.write_all(MAGIC)?;
        out.write_u32::<LittleEndian>(FORMAT_VERSION)?;
        out.write_u32::<LittleEndian>(self.space.dimension() as u32)?;
        out.write_u8(self.space.metric().code())?;
        out.write_u32::<LittleEndian>(self.m as u32)?;
        out.write_u32::<LittleEndian>(self.ef_construction as u32)?;
        out.write_u32::<LittleEndian>(self.ef().min(u32::MAX as usize) as u32)?;
        out.write_u64::<LittleEndian>(self.seed)?;
        out.write_u8(self.allow_replace_deleted as u8)?;
        out.write_i64::<LittleEndian>(node.map_or(-1, i64::from))?;
        out.write_u32::<LittleEndian>(max_level as u32)?;
        out.write_u64::<LittleEndian>(count as u64)?;
        out.write_u64::<LittleEndian>(deleted as u64)?;
        out.write_u64::<LittleEndian>(next_label)?;

        for (node, &is_deleted) in self.nodes[..count].iter().zip(&tombstones) {
            out.write_u64::<LittleEndian>(node.label.load(Ordering::Acquire))?;
            out.write_u8(is_deleted as u8)?;
            {
                let links = node.links.read();
                out.write_u32::<LittleEndian>(links.len().saturating_sub(1) as u32)?;
                for layer in links.iter() {
                    write_id_list(&mut out, layer)?;
                }
            }
            write_f32_slice(&mut out, &node.vector.read())?;
        }

        out.finish()
    }

    /// Rebuild a graph from a snapshot.
    ///
    /// `space` must match the stored dimension and metric. The capacity is
    /// `max(max_elements, stored count)`. `available_bytes` bounds the record
    /// count before anything is allocated. Returns the graph and the stored
    /// auto-label counter.
    pub(crate) fn read_from<R: Read>(
        input: R,
        space: MetricSpace,
        max_elements: usize,
        allow_replace_deleted: bool,
        available_bytes: u64,
    ) -> Result<(Self, u64)> {
        let mut input = ChecksumReader::new(input);
        let header = read_header(&mut input, &space, available_bytes)?;

        let capacity = max_elements.max(header.count);
        let mut graph = HnswGraph::new(
            space,
            capacity,
            header.m,
            header.ef_construction,
            header.ef,
            header.seed,
            allow_replace_deleted,
        )?;

        let count = header.count;
        let mut deleted = 0usize;
        {
            let lookup = graph.label_lookup.get_mut();
            let slots = graph.deleted_slots.get_mut();
            for (id, node) in graph.nodes[..count].iter_mut().enumerate() {
                let label = input.read_u64::<LittleEndian>().map_err(truncated)?;
                let is_deleted = input.read_u8().map_err(truncated)? != 0;
                let level = input.read_u32::<LittleEndian>().map_err(truncated)? as usize;
                if level > MAX_LEVEL {
                    return Err(VicinityError::corrupt(format!(
                        "Node {id} has implausible level {level}"
                    )));
                }

                let mut links = Vec::with_capacity(level + 1);
                for layer in 0..=level {
                    let limit = if layer == 0 { header.m * 2 } else { header.m };
                    let ids = read_id_list(&mut input, limit)?;
                    if let Some(&bad) = ids.iter().find(|&&n| n as usize >= count) {
                        return Err(VicinityError::corrupt(format!(
                            "Node {id} links to out-of-range node {bad}"
                        )));
                    }
                    links.push(ids);
                }
                let vector = read_f32_vec(&mut input, space.dimension())?;

                if lookup.insert(label, id as NodeId).is_some() {
                    return Err(VicinityError::corrupt(format!("Duplicate label {label}")));
                }
                if is_deleted {
                    deleted += 1;
                    if allow_replace_deleted {
                        slots.insert(id as NodeId);
                    }
                }

                *node.label.get_mut() = label;
                *node.deleted.get_mut() = is_deleted;
                *node.links.get_mut() = links;
                *node.vector.get_mut() = vector;
            }
        }
        input.verify()?;

        if deleted != header.deleted {
            return Err(VicinityError::corrupt(format!(
                "Header claims {} deleted elements, records hold {deleted}",
                header.deleted
            )));
        }
        match header.entry {
            None if count > 0 => {
                return Err(VicinityError::corrupt("Non-empty index without entry point"));
            }
            Some(entry) if graph.level_of(entry) != header.max_level => {
                return Err(VicinityError::corrupt(format!(
                    "Entry point level {} does not match max level {}",
                    graph.level_of(entry),
                    header.max_level
                )));
            }
            _ => {}
        }

        *graph.element_count.get_mut() = count;
        *graph.deleted_count.get_mut() = deleted;
        *graph.entry.get_mut() = EntryPoint {
            node: header.entry,
            max_level: header.max_level,
        };
        // Every occupied slot consumed exactly one level draw.
        graph.levels.get_mut().skip(count as u64);
        if let Some(entry) = header.entry
            && graph.is_deleted(entry)
        {
            graph.relocate_entry_from(entry);
        }

        Ok((graph, header.next_label))
    }
}

fn read_header<R: Read>(input: &mut R, space: &MetricSpace, available_bytes: u64) -> Result<Header> {
    let mut magic = [0u8; 4];
    input.read_exact(&mut magic).map_err(truncated)?;
    if &magic != MAGIC {
        return Err(VicinityError::corrupt("Not a vicinity index file"));
    }

    let version = input.read_u32::<LittleEndian>().map_err(truncated)?;
    if version != FORMAT_VERSION {
        return Err(VicinityError::corrupt(format!(
            "Unsupported format version {version}"
        )));
    }

    let dimension = input.read_u32::<LittleEndian>().map_err(truncated)? as usize;
    if dimension != space.dimension() {
        return Err(VicinityError::corrupt(format!(
            "Stored dimension {dimension} does not match expected {}",
            space.dimension()
        )));
    }
    let metric = DistanceMetric::from_code(input.read_u8().map_err(truncated)?)?;
    if metric != space.metric() {
        return Err(VicinityError::corrupt(format!(
            "Stored metric {metric} does not match expected {}",
            space.metric()
        )));
    }

    let m = input.read_u32::<LittleEndian>().map_err(truncated)? as usize;
    if m == 0 {
        return Err(VicinityError::corrupt("Stored M is zero"));
    }
    let ef_construction = input.read_u32::<LittleEndian>().map_err(truncated)? as usize;
    let ef = input.read_u32::<LittleEndian>().map_err(truncated)? as usize;
    let seed = input.read_u64::<LittleEndian>().map_err(truncated)?;
    let _allow_replace = input.read_u8().map_err(truncated)?;
    let entry = input.read_i64::<LittleEndian>().map_err(truncated)?;
    let max_level = input.read_u32::<LittleEndian>().map_err(truncated)? as usize;
    let count = input.read_u64::<LittleEndian>().map_err(truncated)?;
    let deleted = input.read_u64::<LittleEndian>().map_err(truncated)?;
    let next_label = input.read_u64::<LittleEndian>().map_err(truncated)?;

    // label + tombstone + level + one empty layer + vector
    let min_record = 8 + 1 + 4 + 4 + 4 * dimension as u64;
    let body = available_bytes.saturating_sub(HEADER_LEN + 4);
    if count > NodeId::MAX as u64 || count.saturating_mul(min_record) > body {
        return Err(VicinityError::corrupt(format!(
            "Element count {count} does not fit in the file"
        )));
    }
    if deleted > count {
        return Err(VicinityError::corrupt(format!(
            "Deleted count {deleted} exceeds element count {count}"
        )));
    }
    let entry = match entry {
        -1 => None,
        id if id >= 0 && (id as u64) < count => Some(id as NodeId),
        id => {
            return Err(VicinityError::corrupt(format!(
                "Entry point {id} is out of range"
            )));
        }
    };

    Ok(Header {
        m,
        ef_construction,
        ef,
        seed,
        entry,
        max_level,
        count: count as usize,
        deleted: deleted as usize,
        next_label,
    })
}
