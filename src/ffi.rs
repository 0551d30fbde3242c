use bytemuck::{Pod, Zeroable};

use crate::config::ConfigError;

// status tags shared with the renderer
pub const STATUS_INDIVIDUAL: u32 = 0;
pub const STATUS_MERGED: u32 = 1;

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct BoidRecord {
    // plain arrays so the layout stays fixed for foreign readers
    pub pos: [f32; 2],
    pub vel: [f32; 2],
    pub team: u32,
    pub status: u32,
}

/// Field placement inside a foreign fixed-stride entity buffer.
///
/// Only the stride and these offsets are interpreted; everything else in a
/// record is opaque.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordLayout {
    pub stride: usize,
    pub pos_offset: usize,
    pub vel_offset: usize,
    pub team_offset: usize,
}

impl Default for RecordLayout {
    fn default() -> Self {
        Self {
            stride: std::mem::size_of::<BoidRecord>(),
            pos_offset: std::mem::offset_of!(BoidRecord, pos),
            vel_offset: std::mem::offset_of!(BoidRecord, vel),
            team_offset: std::mem::offset_of!(BoidRecord, team),
        }
    }
}

impl RecordLayout {
    /// `{posX, posY, velX, velY, team}` packed with no padding.
    pub const PACKED: RecordLayout = RecordLayout {
        stride: 20,
        pos_offset: 0,
        vel_offset: 8,
        team_offset: 16,
    };

    fn check(&self) -> Result<(), ConfigError> {
        if self.stride == 0 {
            return Err(ConfigError::Invalid("record stride must be non-zero"));
        }
        for (offset, size) in [(self.pos_offset, 8), (self.vel_offset, 8), (self.team_offset, 4)] {
            if offset + size > self.stride {
                return Err(ConfigError::RecordField {
                    offset,
                    size,
                    stride: self.stride,
                });
            }
        }
        Ok(())
    }

    /// Reads every record of `bytes`; fails at init time on a ragged buffer.
    pub fn read(&self, bytes: &[u8]) -> Result<Vec<BoidRecord>, ConfigError> {
        self.check()?;
        if bytes.len() % self.stride != 0 {
            return Err(ConfigError::RecordStride {
                len: bytes.len(),
                stride: self.stride,
            });
        }

        let records = bytes
            .chunks_exact(self.stride)
            .map(|raw| BoidRecord {
                pos: bytemuck::pod_read_unaligned(&raw[self.pos_offset..self.pos_offset + 8]),
                vel: bytemuck::pod_read_unaligned(&raw[self.vel_offset..self.vel_offset + 8]),
                team: bytemuck::pod_read_unaligned(&raw[self.team_offset..self.team_offset + 4]),
                status: STATUS_INDIVIDUAL,
            })
            .collect();
        Ok(records)
    }
}
