// vim: tw=80
//! Partitioning an IOTS by the paged metadata of the chunks it touches
//!
//! Each piece of a request is narrowed before any SIOTS is generated for it,
//! so that every SIOTS covers chunks with identical rebuild and verify state.

use tracing::{debug, error, info, warn};

use crate::{
    opcode::Opcode,
    position::PositionBitmask,
    raid::{stripe_range, RaidClass, RaidType, MAX_PARITY_EXTENTS},
    types::*,
    util::round_up,
};
use super::Iots;

/// Most chunks of paged metadata that one IOTS piece may span
pub const MAX_CHUNKS: usize = 4;

/// A snapshot of one chunk's paged metadata
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ChunkInfo {
    /// Positions that must be rebuilt
    pub needs_rebuild_bits: PositionBitmask,
    /// Positions marked for verify
    pub verify_bits: PositionBitmask,
    pub rekey: bool,
}

impl ChunkInfo {
    fn same_state(&self, other: &ChunkInfo) -> bool {
        self.needs_rebuild_bits == other.needs_rebuild_bits &&
            self.verify_bits == other.verify_bits &&
            self.rekey == other.rekey
    }
}

impl Iots {
    /// Per-drive start and length of a range, rounded outward to whole
    /// chunks.
    fn chunk_extent(&self, opcode: Opcode, lba: LbaT, blocks: BlockCount,
                    chunk_size: ChunkSize) -> Result<(LbaT, BlockCount)>
    {
        let cs = BlockCount::from(chunk_size);
        if cs == 0 {
            error!(iots = self.id, "chunk size is zero");
            return Err(Error::GenericFailure);
        }
        let (start, end) = if opcode.is_lba_disk_based() {
            (lba - lba % cs, lba + blocks)
        } else {
            let g = &self.ctx.geometry;
            let (es, dd) = g.stripe_dimensions()?;
            let range = stripe_range(lba, blocks, es, dd, MAX_PARITY_EXTENTS);
            let end = if range[1].is_empty() {
                range[0].end()
            } else {
                if range[1].start_lba < range[0].end() {
                    error!(iots = self.id, first = ?range[0],
                        second = ?range[1], "extents overlap");
                    return Err(Error::GenericFailure);
                }
                range[1].end()
            };
            (range[0].start_lba - range[0].start_lba % cs, end)
        };
        Ok((start, round_up(end - start, cs)))
    }

    /// Which chunks of the paged metadata must be fetched for a range of the
    /// packet?  At most `MAX_CHUNKS` are returned, and none past the end of
    /// the raid group.
    pub fn get_chunk_range(&self, lba: LbaT, blocks: BlockCount,
                           chunk_size: ChunkSize)
        -> Result<(ChunkIndex, ChunkCount)>
    {
        let (start_lba, chunk_blocks) = self.chunk_extent(self.op.opcode, lba,
                                                          blocks, chunk_size)?;
        let cs = BlockCount::from(chunk_size);
        let chunks = (chunk_blocks / cs).min(MAX_CHUNKS as u64);
        let total = self.ctx.geometry.total_map_chunks(chunk_size)?;
        let end = (start_lba / cs + chunks).min(total);
        let start = (start_lba / cs).min(end);
        // Bounded by MAX_CHUNKS
        Ok((start, (end - start) as ChunkCount))
    }

    /// Per-drive range of the chunks touched by a range of the current
    /// piece, with no limit on the number of chunks.
    pub fn get_chunk_lba_blocks(&self, lba: LbaT, blocks: BlockCount,
                                chunk_size: ChunkSize)
        -> Result<(LbaT, BlockCount)>
    {
        self.chunk_extent(self.current_opcode, lba, blocks, chunk_size)
    }

    /// Are both ends of the packet on a chunk boundary?
    pub fn is_iots_aligned_to_chunk(&self, chunk_size: ChunkSize)
        -> Result<bool>
    {
        let mut cs = BlockCount::from(chunk_size);
        if !self.current_opcode.is_lba_disk_based() {
            cs *= BlockCount::from(self.ctx.geometry.data_disks()?);
        }
        if cs == 0 {
            return Err(Error::GenericFailure);
        }
        Ok(self.packet_lba % cs == 0 && self.packet_blocks % cs == 0)
    }

    /// Is this a zero request that is aligned to whole chunks?  Such
    /// requests aren't limited in size.
    pub fn is_zero_request_aligned_to_chunk(&self, chunk_size: ChunkSize)
        -> bool
    {
        if !self.op.opcode.is_chunk_zero() ||
            !self.is_iots_aligned_to_chunk(chunk_size).unwrap_or(false)
        {
            return false;
        }
        if self.lba + self.blocks > self.packet_lba + self.packet_blocks {
            error!(iots = self.id, lba = self.lba, blocks = self.blocks,
                packet_lba = self.packet_lba,
                packet_blocks = self.packet_blocks,
                "zero piece extends past its packet");
            return false;
        }
        true
    }

    /// Replace the current piece's length, and recompute whether it is the
    /// last piece.
    fn set_piece_blocks(&mut self, blocks: BlockCount) {
        self.blocks = blocks;
        self.blocks_remaining = blocks;
        self.current_op_blocks = blocks;
        self.mark_updated_request();
    }

    fn set_piece_range(&mut self, lba: LbaT, blocks: BlockCount) {
        self.lba = lba;
        self.current_lba = lba;
        self.current_op_lba = lba;
        self.set_piece_blocks(blocks);
    }

    /// Limit the piece to as many chunks as an IOTS can track.
    pub fn determine_next_blocks(&mut self, chunk_size: ChunkSize)
        -> Result<()>
    {
        let opcode = self.op.opcode;
        let max_per_drive = BlockCount::from(chunk_size) * MAX_CHUNKS as u64;
        let mut blocks = self.blocks;
        if opcode != Opcode::MarkForRebuild {
            if opcode.is_lba_disk_based() {
                blocks = blocks.min(max_per_drive);
            } else if !self.is_zero_request_aligned_to_chunk(chunk_size) {
                let dd = BlockCount::from(self.ctx.geometry.data_disks()?);
                blocks = blocks.min(max_per_drive * dd);
            }
        }
        self.set_piece_blocks(blocks);
        Ok(())
    }

    /// End the piece at the first chunk whose paged metadata differs from
    /// the first chunk's.  Write log flushes are never split.
    pub fn limit_blocks_for_degraded(&mut self, chunk_size: ChunkSize)
        -> Result<()>
    {
        if self.is_zero_request_aligned_to_chunk(chunk_size) {
            return Ok(());
        }
        let opcode = self.current_opcode;
        let lba = self.current_op_lba;
        let orig_blocks = self.current_op_blocks;
        let (start_lba, chunk_blocks) = self.get_chunk_lba_blocks(lba,
            orig_blocks, chunk_size)?;
        let cs = BlockCount::from(chunk_size);
        let max_chunks = ((chunk_blocks / cs) as usize).min(MAX_CHUNKS);
        let first = self.chunk_info[0];
        let mut index = 1;
        while index < max_chunks {
            let chunk = &self.chunk_info[index];
            if !chunk.same_state(&first) {
                if opcode != Opcode::WriteLogFlush {
                    break;
                }
                if chunk.needs_rebuild_bits != first.needs_rebuild_bits ||
                    chunk.verify_bits != first.verify_bits
                {
                    info!(iots = self.id, index, lba, blocks = orig_blocks,
                        verify = %chunk.verify_bits,
                        first_verify = %first.verify_bits,
                        rebuild = %chunk.needs_rebuild_bits,
                        first_rebuild = %first.needs_rebuild_bits,
                        "flush spans chunks of differing state");
                }
            }
            index += 1;
        }
        let last_chunk = start_lba / cs + index as u64;
        let end_lba = if opcode.is_lba_disk_based() {
            cs * last_chunk
        } else {
            cs * BlockCount::from(self.ctx.geometry.data_disks()?) * last_chunk
        };
        let to_chunk_end = end_lba.saturating_sub(lba);
        invariant!(to_chunk_end <= u64::from(u32::MAX), iots = self.id,
            end_lba, lba, chunk_size, "block count too large");
        let mut blocks = if to_chunk_end == 0 {
            orig_blocks
        } else {
            orig_blocks.min(to_chunk_end)
        };
        if blocks > orig_blocks {
            error!(iots = self.id, blocks, orig_blocks,
                "degraded limit grew the request");
            blocks = orig_blocks;
        }
        if blocks != orig_blocks {
            if opcode.is_write_log() {
                error!(iots = self.id, lba, blocks, orig_blocks, end_lba,
                    index, "split a journal request");
            }
            self.set_piece_blocks(blocks);
        }
        Ok(())
    }

    /// Number of whole chunks in the current piece, which must be a
    /// chunk-aligned background request.
    fn aligned_chunk_count(&self, chunk_size: ChunkSize, what: &str)
        -> Result<usize>
    {
        let opcode = self.current_opcode;
        if !opcode.is_lba_disk_based() {
            error!(iots = self.id, ?opcode, lba = self.current_op_lba,
                blocks = self.current_op_blocks, what,
                "not a disk-based operation");
            return Err(Error::UnsupportedOpcode);
        }
        if !self.is_iots_aligned_to_chunk(chunk_size)? {
            error!(iots = self.id, ?opcode, lba = self.current_op_lba,
                blocks = self.current_op_blocks, chunk_size, what,
                "not aligned to chunk size");
            return Err(Error::Misaligned);
        }
        let n = self.current_op_blocks / BlockCount::from(chunk_size);
        Ok((n as usize).min(MAX_CHUNKS))
    }

    /// Drop the first `skip` chunks of the piece
    fn skip_chunks(&mut self, skip: usize, count: usize,
                   chunk_size: ChunkSize)
    {
        self.chunk_info.copy_within(skip..count, 0);
        let removed = skip as u64 * BlockCount::from(chunk_size);
        let lba = self.current_op_lba + removed;
        let blocks = self.current_op_blocks - removed;
        self.set_piece_range(lba, blocks);
    }

    /// Skip leading chunks in which none of `positions` needs rebuilding
    pub fn remove_nondegraded(&mut self, positions: PositionBitmask,
                              chunk_size: ChunkSize) -> Result<()>
    {
        let count = self.aligned_chunk_count(chunk_size,
                                             "remove nondegraded")?;
        let skip = self.chunk_info[..count].iter()
            .take_while(|c| (positions & c.needs_rebuild_bits).is_empty())
            .count();
        if skip == 0 {
            return Ok(());
        }
        if self.current_opcode.is_write_log() {
            warn!(iots = self.id, opcode = ?self.current_opcode,
                "cannot modify a journal request");
            error!(iots = self.id, skip, "journal request has clean chunks");
            return Err(Error::UnsupportedOpcode);
        }
        debug!(iots = self.id, %positions, skip, count,
            "removing nondegraded chunks");
        self.skip_chunks(skip, count, chunk_size);
        Ok(())
    }

    /// Skip leading chunks that aren't marked for verify
    pub fn verify_remove_unmarked(&mut self, chunk_size: ChunkSize)
        -> Result<()>
    {
        let count = self.aligned_chunk_count(chunk_size,
                                             "remove unmarked")?;
        let skip = self.chunk_info[..count].iter()
            .take_while(|c| c.verify_bits.is_empty())
            .count();
        if skip == count {
            warn!(iots = self.id, count, "no chunks marked for verify");
            return Err(Error::NothingMarked);
        }
        if skip > 0 {
            debug!(iots = self.id, skip, count, "removing unmarked chunks");
            self.skip_chunks(skip, count, chunk_size);
        }
        Ok(())
    }

    /// Check that the fetched chunk info is usable: every chunk needs
    /// rebuilding on the same positions, and no more positions than the
    /// raid type can tolerate.
    pub fn validate_chunk_info(&self, lba: LbaT, blocks: BlockCount,
                               chunk_size: ChunkSize) -> Result<()>
    {
        let (_, count) = self.get_chunk_range(lba, blocks, chunk_size)?;
        let g = &self.ctx.geometry;
        let rebuild = self.chunk_info[0].needs_rebuild_bits;
        let tolerated = match g.raid_type() {
            RaidType::Raid6 => 2,
            _ if g.is_parity_type() || g.class() == RaidClass::Striper => 1,
            _ => u32::MAX
        };
        for (i, chunk) in self.chunk_info[..count as usize].iter().enumerate()
        {
            if chunk.needs_rebuild_bits != rebuild {
                error!(iots = self.id, chunk = i,
                    bits = %chunk.needs_rebuild_bits, first = %rebuild,
                    "rebuild bits differ from the first chunk's");
                return Err(Error::InconsistentChunkInfo);
            }
            let n = chunk.needs_rebuild_bits.count();
            if n > tolerated {
                error!(iots = self.id, object_id = g.object_id(), chunk = i,
                    bits = %chunk.needs_rebuild_bits,
                    "too many positions need rebuilding");
                return Err(Error::InconsistentChunkInfo);
            }
        }
        Ok(())
    }
}

// LCOV_EXCL_STOP
