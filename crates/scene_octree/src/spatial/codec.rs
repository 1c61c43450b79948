//! Binary tree serialization
//!
//! Layout: the geometry and material intern tables once, then one
//! chunk per node in pre-order. A chunk is a format version, the
//! node's split box, a child presence mask, and a fixed-size record
//! per object. All multi-byte values honor the endianness passed per
//! call, so a tool can bake data for a console of either byte order.

use log::info;
use thiserror::Error;

use crate::config::OctreeConfig;
use crate::foundation::math::Mat4;
use crate::scene::bounds::Aabb;
use crate::scene::object::{ObjectCategory, ObjectFlags, ObjectId, ObjectTypeTag, RenderObject};
use crate::scene::tables::{GeometryId, InternTable, MaterialId};
use crate::spatial::node::{NodeFlags, NodeId, OctreeNode};
use crate::spatial::octree::Octree;

/// On-disk format version
const FORMAT_VERSION: u32 = 1;

/// Bytes per serialized object record
const RECORD_SIZE: usize = 111;

/// Byte order of a serialized tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    /// Least significant byte first
    Little,
    /// Most significant byte first
    Big,
}

/// Serialization failures
#[derive(Debug, Error)]
pub enum CodecError {
    /// The stream was written by an incompatible format version
    #[error("format version {found} does not match expected {expected}")]
    VersionMismatch {
        /// Version found in the stream
        found: u32,
        /// Version this build reads and writes
        expected: u32,
    },
    /// The buffer ended inside a value
    #[error("unexpected end of stream at byte {at}")]
    Truncated {
        /// Offset of the failed read
        at: usize,
    },
    /// An object block length is not a whole number of records
    #[error("object block of {size} bytes is not a multiple of the record size")]
    BlockSizeMismatch {
        /// Stored block length
        size: u32,
    },
    /// A stored enum, id, or string failed validation
    #[error("invalid stored value: {context}")]
    InvalidValue {
        /// What was being decoded
        context: &'static str,
    },
}

impl Octree {
    /// Serialize the tree into `out`, returning the bytes written
    ///
    /// Runs a cleanup and full compile first so the stored aggregates
    /// are exact.
    pub fn save(&mut self, out: &mut Vec<u8>, endian: Endian) -> Result<usize, CodecError> {
        self.cleanup();
        self.compile_all();

        let start = out.len();
        write_table(out, &self.geometry_table, endian)?;
        write_table(out, &self.material_table, endian)?;
        self.write_node(self.root, out, endian)?;
        let written = out.len() - start;
        info!(
            "saved octree: {} nodes, {} objects, {written} bytes",
            self.node_count(),
            self.object_count()
        );
        Ok(written)
    }

    /// Rebuild a tree from `buf`, returning it with the bytes consumed
    ///
    /// With a `filter` box, subtrees whose split box misses the filter
    /// are parsed but not instantiated; the stream is always consumed
    /// in full so the caller can read trailing data.
    pub fn load(
        buf: &[u8],
        config: OctreeConfig,
        endian: Endian,
        filter: Option<&Aabb>,
    ) -> Result<(Self, usize), CodecError> {
        let mut reader = Reader::new(buf, endian);
        let geometry_table = read_table(&mut reader)?;
        let material_table = read_table(&mut reader)?;

        let root_chunk = read_chunk(&mut reader)?;
        let mut tree = Octree::new(root_chunk.bounds, config);
        tree.geometry_table = geometry_table;
        tree.material_table = material_table;
        tree.link_chunk_objects(tree.root, &root_chunk)?;
        let root = tree.root;
        for octant in 0..8 {
            if root_chunk.child_mask & (1 << octant) != 0 {
                tree.read_subtree(&mut reader, root, octant, filter)?;
            }
        }

        tree.cleanup();
        info!(
            "loaded octree: {} nodes, {} objects",
            tree.node_count(),
            tree.object_count()
        );
        Ok((tree, reader.pos))
    }

    fn write_node(&self, id: NodeId, out: &mut Vec<u8>, endian: Endian) -> Result<(), CodecError> {
        let node = &self.nodes[id];
        write_u32(out, FORMAT_VERSION, endian);
        write_aabb(out, &node.split_box, endian);
        out.push(node.child_mask());

        let count: usize = node.lists.iter().map(Vec::len).sum();
        let block = count
            .checked_mul(RECORD_SIZE)
            .and_then(|b| u32::try_from(b).ok())
            .ok_or(CodecError::InvalidValue {
                context: "object block too large",
            })?;
        write_u32(out, block, endian);

        for list in &node.lists {
            for &object_id in list {
                write_record(out, &self.objects[object_id], endian);
            }
        }

        for child in node.children.iter().flatten() {
            self.write_node(*child, out, endian)?;
        }
        Ok(())
    }

    fn read_subtree(
        &mut self,
        reader: &mut Reader<'_>,
        parent: NodeId,
        octant: usize,
        filter: Option<&Aabb>,
    ) -> Result<(), CodecError> {
        let chunk = read_chunk(reader)?;
        let keep = filter.map_or(true, |f| f.intersects(&chunk.bounds));

        let node_id = if keep {
            let id = self.nodes.insert(OctreeNode::new(chunk.bounds, Some(parent)));
            self.nodes[parent].children[octant] = Some(id);
            self.link_chunk_objects(id, &chunk)?;
            Some(id)
        } else {
            None
        };

        for child_octant in 0..8 {
            if chunk.child_mask & (1 << child_octant) != 0 {
                match node_id {
                    Some(id) => self.read_subtree(reader, id, child_octant, filter)?,
                    // excluded subtree: keep the stream aligned
                    None => skip_subtree(reader)?,
                }
            }
        }
        Ok(())
    }

    fn link_chunk_objects(&mut self, id: NodeId, chunk: &NodeChunk) -> Result<(), CodecError> {
        for record in &chunk.objects {
            let object = self.decode_record(record)?;
            let casts = object.flags.contains(ObjectFlags::CAST_SHADOWS);
            let object_id = self.objects.insert(object);

            let obj = &mut self.objects[object_id];
            obj.owner = Some(id);
            let node = &mut self.nodes[id];
            let list = &mut node.lists[obj.category.index()];
            obj.list_slot = list.len();
            list.push(object_id);

            if casts {
                let mut current = Some(id);
                while let Some(node_id) = current {
                    let node = &mut self.nodes[node_id];
                    node.flags |= NodeFlags::HAS_CASTERS;
                    current = node.parent;
                }
            }
        }
        Ok(())
    }

    fn decode_record(&self, record: &ObjectRecord) -> Result<RenderObject, CodecError> {
        let category =
            ObjectCategory::from_index(record.category).ok_or(CodecError::InvalidValue {
                context: "object category",
            })?;
        let type_tag = ObjectTypeTag::from_u8(record.type_tag).ok_or(CodecError::InvalidValue {
            context: "object type tag",
        })?;
        let flags = ObjectFlags::from_bits(record.flags).ok_or(CodecError::InvalidValue {
            context: "object flags",
        })?;
        if record.geometry as usize >= self.geometry_table.len() {
            return Err(CodecError::InvalidValue {
                context: "geometry id",
            });
        }
        if record.material as usize >= self.material_table.len() {
            return Err(CodecError::InvalidValue {
                context: "material id",
            });
        }

        let mut object = RenderObject::new(
            record.bounds,
            record.transform,
            category,
            type_tag,
            flags,
            record.max_view_dist,
            GeometryId(record.geometry),
            MaterialId(record.material),
        );
        object.pass_mask = record.pass_mask;
        object.can_render_as_job = record.can_job;
        Ok(object)
    }
}

struct NodeChunk {
    bounds: Aabb,
    child_mask: u8,
    objects: Vec<ObjectRecord>,
}

struct ObjectRecord {
    bounds: Aabb,
    transform: Mat4,
    max_view_dist: f32,
    geometry: u32,
    material: u32,
    flags: u32,
    pass_mask: u32,
    category: u8,
    type_tag: u8,
    can_job: bool,
}

fn read_chunk(reader: &mut Reader<'_>) -> Result<NodeChunk, CodecError> {
    let version = reader.read_u32()?;
    if version != FORMAT_VERSION {
        return Err(CodecError::VersionMismatch {
            found: version,
            expected: FORMAT_VERSION,
        });
    }
    let bounds = reader.read_aabb()?;
    let child_mask = reader.read_u8()?;
    let block = reader.read_u32()?;
    if block as usize % RECORD_SIZE != 0 {
        return Err(CodecError::BlockSizeMismatch { size: block });
    }
    let count = block as usize / RECORD_SIZE;
    let mut objects = Vec::with_capacity(count);
    for _ in 0..count {
        objects.push(read_record(reader)?);
    }
    Ok(NodeChunk {
        bounds,
        child_mask,
        objects,
    })
}

/// Parse and discard one subtree of an already-validated stream
fn skip_subtree(reader: &mut Reader<'_>) -> Result<(), CodecError> {
    let chunk = read_chunk(reader)?;
    for octant in 0..8 {
        if chunk.child_mask & (1 << octant) != 0 {
            skip_subtree(reader)?;
        }
    }
    Ok(())
}

fn write_record(out: &mut Vec<u8>, object: &RenderObject, endian: Endian) {
    write_aabb(out, &object.bounds, endian);
    for value in object.transform.iter() {
        write_f32(out, *value, endian);
    }
    write_f32(out, object.max_view_dist, endian);
    write_u32(out, object.geometry.0, endian);
    write_u32(out, object.material.0, endian);
    write_u32(out, object.flags.bits(), endian);
    write_u32(out, object.pass_mask, endian);
    out.push(object.category.index() as u8);
    out.push(object.type_tag as u8);
    out.push(u8::from(object.can_render_as_job));
}

fn read_record(reader: &mut Reader<'_>) -> Result<ObjectRecord, CodecError> {
    let bounds = reader.read_aabb()?;
    let mut values = [0.0f32; 16];
    for value in &mut values {
        *value = reader.read_f32()?;
    }
    let transform = Mat4::from_column_slice(&values);
    Ok(ObjectRecord {
        bounds,
        transform,
        max_view_dist: reader.read_f32()?,
        geometry: reader.read_u32()?,
        material: reader.read_u32()?,
        flags: reader.read_u32()?,
        pass_mask: reader.read_u32()?,
        category: reader.read_u8()?,
        type_tag: reader.read_u8()?,
        can_job: reader.read_u8()? != 0,
    })
}

fn write_table(out: &mut Vec<u8>, table: &InternTable, endian: Endian) -> Result<(), CodecError> {
    let count = u32::try_from(table.len()).map_err(|_| CodecError::InvalidValue {
        context: "intern table too large",
    })?;
    write_u32(out, count, endian);
    for entry in table.entries() {
        let len = u32::try_from(entry.len()).map_err(|_| CodecError::InvalidValue {
            context: "intern entry too long",
        })?;
        write_u32(out, len, endian);
        out.extend_from_slice(entry.as_bytes());
    }
    Ok(())
}

fn read_table(reader: &mut Reader<'_>) -> Result<InternTable, CodecError> {
    let count = reader.read_u32()? as usize;
    let mut entries = Vec::with_capacity(count.min(4096));
    for _ in 0..count {
        let len = reader.read_u32()? as usize;
        let bytes = reader.read_bytes(len)?;
        let entry = String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidValue {
            context: "intern entry utf-8",
        })?;
        entries.push(entry);
    }
    Ok(InternTable::from_entries(entries))
}

fn write_u32(out: &mut Vec<u8>, value: u32, endian: Endian) {
    match endian {
        Endian::Little => out.extend_from_slice(&value.to_le_bytes()),
        Endian::Big => out.extend_from_slice(&value.to_be_bytes()),
    }
}

fn write_f32(out: &mut Vec<u8>, value: f32, endian: Endian) {
    write_u32(out, value.to_bits(), endian);
}

fn write_aabb(out: &mut Vec<u8>, aabb: &Aabb, endian: Endian) {
    for value in [
        aabb.min.x, aabb.min.y, aabb.min.z, aabb.max.x, aabb.max.y, aabb.max.z,
    ] {
        write_f32(out, value, endian);
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
    endian: Endian,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8], endian: Endian) -> Self {
        Self {
            buf,
            pos: 0,
            endian,
        }
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.buf.len())
            .ok_or(CodecError::Truncated { at: self.pos })?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_u32(&mut self) -> Result<u32, CodecError> {
        let bytes: [u8; 4] = self.read_bytes(4)?.try_into().map_err(|_| CodecError::Truncated { at: self.pos })?;
        Ok(match self.endian {
            Endian::Little => u32::from_le_bytes(bytes),
            Endian::Big => u32::from_be_bytes(bytes),
        })
    }

    fn read_f32(&mut self) -> Result<f32, CodecError> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    fn read_aabb(&mut self) -> Result<Aabb, CodecError> {
        use crate::foundation::math::Vec3;
        let min = Vec3::new(self.read_f32()?, self.read_f32()?, self.read_f32()?);
        let max = Vec3::new(self.read_f32()?, self.read_f32()?, self.read_f32()?);
        Ok(Aabb::new(min, max))
    }
}
