//! Bounded FIFO replay buffer with periodic columnar disk shard flush
//! (§3 Replay sample, §4.11 self-play/trainer data flow).

use byteorder::{LittleEndian, WriteBytesExt};
use std::collections::VecDeque;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    SelfPlay,
    AtlasSeed,
}

#[derive(Debug, Clone)]
pub struct ReplaySample {
    pub game_id: String,
    pub state_planes: Vec<f32>,
    pub target_pi: Vec<f32>,
    pub target_z: f32,
    pub ply: u32,
    pub source: Source,
    pub atlas_target: Option<Vec<f32>>,
}

/// Bounded FIFO: pushing past `capacity` evicts the oldest sample first.
#[derive(Debug)]
pub struct ReplayBuffer {
    capacity: usize,
    samples: VecDeque<ReplaySample>,
}

impl ReplayBuffer {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, samples: VecDeque::with_capacity(capacity) }
    }

    pub fn push(&mut self, sample: ReplaySample) {
        if self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn sample_batch(&self, rng: &mut rand::rngs::SmallRng, batch_size: usize) -> Vec<&ReplaySample> {
        use rand::seq::IteratorRandom;
        self.samples.iter().choose_multiple(rng, batch_size.min(self.samples.len()))
    }
}

/// Columnar shard writer: buffers samples until `shard_size` is reached,
/// then flushes one binary shard file per `shard_size` samples.
pub struct ShardWriter {
    dir: PathBuf,
    shard_size: usize,
    buffer: Vec<ReplaySample>,
    next_shard: usize,
}

impl ShardWriter {
    pub fn new(dir: impl AsRef<Path>, shard_size: usize) -> io::Result<Self> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir: dir.as_ref().to_path_buf(), shard_size, buffer: Vec::new(), next_shard: 0 })
    }

    pub fn append(&mut self, sample: ReplaySample) -> io::Result<()> {
        self.buffer.push(sample);
        if self.buffer.len() >= self.shard_size {
            self.flush()?;
        }
        Ok(())
    }

    /// Flushes whatever is buffered, even a partial shard; called on
    /// cancel before the worker exits (§4.11 step 5, §5 cancellation
    /// semantics).
    pub fn flush(&mut self) -> io::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let path = self.dir.join(format!("shard-{:06}.bin", self.next_shard));
        let mut file = std::fs::File::create(path)?;
        write_shard(&mut file, &self.buffer)?;
        self.buffer.clear();
        self.next_shard += 1;
        Ok(())
    }
}

fn write_shard(w: &mut impl Write, samples: &[ReplaySample]) -> io::Result<()> {
    w.write_u32::<LittleEndian>(samples.len() as u32)?;
    for s in samples {
        w.write_u32::<LittleEndian>(s.state_planes.len() as u32)?;
        for v in &s.state_planes {
            w.write_f32::<LittleEndian>(*v)?;
        }
        w.write_u32::<LittleEndian>(s.target_pi.len() as u32)?;
        for v in &s.target_pi {
            w.write_f32::<LittleEndian>(*v)?;
        }
        w.write_f32::<LittleEndian>(s.target_z)?;
        w.write_u32::<LittleEndian>(s.ply)?;
        w.write_u8(matches!(s.source, Source::AtlasSeed) as u8)?;
        match &s.atlas_target {
            Some(target) => {
                w.write_u8(1)?;
                for v in target {
                    w.write_f32::<LittleEndian>(*v)?;
                }
            }
            None => w.write_u8(0)?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(ply: u32) -> ReplaySample {
        ReplaySample {
            game_id: "g1".into(),
            state_planes: vec![0.0; 9],
            target_pi: vec![0.1; 9],
            target_z: 0.5,
            ply,
            source: Source::SelfPlay,
            atlas_target: None,
        }
    }

    #[test]
    fn buffer_never_exceeds_capacity() {
        let mut buf = ReplayBuffer::new(5);
        for i in 0..20 {
            buf.push(sample(i));
        }
        assert_eq!(buf.len(), 5);
    }

    #[test]
    fn buffer_evicts_oldest_first() {
        let mut buf = ReplayBuffer::new(2);
        buf.push(sample(1));
        buf.push(sample(2));
        buf.push(sample(3));
        let plies: Vec<u32> = buf.samples.iter().map(|s| s.ply).collect();
        assert_eq!(plies, vec![2, 3]);
    }

    #[test]
    fn shard_flush_writes_file() {
        let dir = std::env::temp_dir().join(format!("discovery-shard-test-{}", std::process::id()));
        let mut writer = ShardWriter::new(&dir, 3).unwrap();
        for i in 0..3 {
            writer.append(sample(i)).unwrap();
        }
        assert!(dir.join("shard-000000.bin").exists());
        std::fs::remove_dir_all(&dir).ok();
    }
}
