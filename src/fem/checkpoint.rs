use super::{OutputWriter, TimeState};
use crate::base::{agree, Communicator, FsiError};
use russell_lab::Vector;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Persists and restores the fields needed to resume a run
///
/// A checkpoint set is a group of files sharing the step stem:
///
/// ```text
/// {step:06}.{prefix}_checkpoint_{field}
/// ```
///
/// Each file holds the number of values as a little-endian `u64` followed by
/// the little-endian `f64` values. Saving writes the new set first and then
/// deletes every other set, thus exactly one set remains on disk.
///
/// Only rank 0 touches the files; the other ranks receive the loaded values
/// through the communicator. A file error on rank 0 is reported by all ranks.
pub struct CheckpointManager {
    /// Directory holding the checkpoint files
    directory: PathBuf,

    /// Prefix identifying the integrator (e.g., "solid")
    prefix: String,
}

impl CheckpointManager {
    /// Allocates a new instance
    pub fn new(directory: &str, prefix: &str) -> Self {
        CheckpointManager {
            directory: PathBuf::from(directory),
            prefix: prefix.to_string(),
        }
    }

    /// Returns the path of a field file
    pub fn path(&self, step: usize, field: &str) -> PathBuf {
        self.directory
            .join(format!("{:06}.{}_checkpoint_{}", step, self.prefix, field))
    }

    /// Saves a checkpoint set and removes all older (and newer) sets
    pub fn save(&self, comm: &dyn Communicator, step: usize, fields: &[(&str, &Vector)]) -> Result<(), FsiError> {
        let res = if comm.rank() == 0 { self.write_set(step, fields) } else { Ok(()) };
        agree(comm, "writing the checkpoint", res)?;
        log::debug!("saved {} checkpoint at step {}", self.prefix, step);
        Ok(())
    }

    /// Returns the largest step having a checkpoint file with this prefix
    pub fn latest_step(&self) -> Result<Option<usize>, FsiError> {
        Ok(self.steps_on_disk()?.into_iter().max())
    }

    /// Loads the latest checkpoint set
    ///
    /// Returns `None` if there is no checkpoint (cold start). Otherwise,
    /// returns the step and the fields in the order of `names`.
    pub fn load(&self, comm: &dyn Communicator, names: &[&str]) -> Result<Option<(usize, Vec<Vector>)>, FsiError> {
        let latest = if comm.rank() == 0 { self.latest_step() } else { Ok(None) };
        let latest = agree(comm, "listing the checkpoints", latest)?;
        let step = match comm.broadcast_index(0, latest) {
            Some(s) => s,
            None => {
                log::warn!("no {} checkpoint found; starting from scratch", self.prefix);
                return Ok(None);
            }
        };
        let mut fields = Vec::with_capacity(names.len());
        for name in names {
            let data = if comm.rank() == 0 {
                read_field(&self.path(step, name))
            } else {
                Ok(Vec::new())
            };
            let data = agree(comm, "reading the checkpoint", data)?;
            let all = comm.all_gather(&data);
            fields.push(Vector::from(&all[0]));
        }
        log::info!("loaded {} checkpoint of step {}", self.prefix, step);
        Ok(Some((step, fields)))
    }

    fn write_set(&self, step: usize, fields: &[(&str, &Vector)]) -> Result<(), FsiError> {
        fs::create_dir_all(&self.directory)?;
        for (name, values) in fields {
            write_field(&self.path(step, name), values.as_data())?;
        }
        let marker = format!(".{}_checkpoint_", self.prefix);
        for entry in fs::read_dir(&self.directory)? {
            let path = entry?.path();
            if let Some((s, _)) = self.parse(&path, &marker) {
                if s != step {
                    fs::remove_file(&path)?;
                }
            }
        }
        Ok(())
    }

    fn steps_on_disk(&self) -> Result<Vec<usize>, FsiError> {
        if !self.directory.exists() {
            return Ok(Vec::new());
        }
        let marker = format!(".{}_checkpoint_", self.prefix);
        let mut steps = Vec::new();
        for entry in fs::read_dir(&self.directory)? {
            if let Some((s, _)) = self.parse(&entry?.path(), &marker) {
                steps.push(s);
            }
        }
        Ok(steps)
    }

    /// Splits a filename into step and field
    fn parse(&self, path: &Path, marker: &str) -> Option<(usize, String)> {
        let name = path.file_name()?.to_str()?;
        let pos = name.find(marker)?;
        let step = name[..pos].parse::<usize>().ok()?;
        Some((step, name[pos + marker.len()..].to_string()))
    }
}

/// Restores the clock and the output bookkeeping of a run resumed at `step`
///
/// Replays the schedule of steps `0..=step`: step 0 always writes an output
/// and later steps follow [TimeState::time_to_output].
pub fn replay_output_schedule(time: &mut TimeState, writer: &mut OutputWriter, step: usize) {
    time.initialize();
    writer.record(time.current);
    while time.step < step {
        time.increment();
        if time.time_to_output() {
            writer.record(time.current);
        }
    }
}

fn write_field(path: &Path, values: &[f64]) -> Result<(), FsiError> {
    let mut file = BufWriter::new(File::create(path)?);
    file.write_all(&(values.len() as u64).to_le_bytes())?;
    for v in values {
        file.write_all(&v.to_le_bytes())?;
    }
    file.flush()?;
    Ok(())
}

fn read_field(path: &Path) -> Result<Vec<f64>, FsiError> {
    let mut file = BufReader::new(File::open(path)?);
    let mut word = [0u8; 8];
    file.read_exact(&mut word)?;
    let n = u64::from_le_bytes(word) as usize;
    let mut values = Vec::with_capacity(n);
    for _ in 0..n {
        file.read_exact(&mut word)?;
        values.push(f64::from_le_bytes(word));
    }
    Ok(values)
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::{replay_output_schedule, CheckpointManager};
    use crate::base::{Communicator, LocalComm, SerialComm, DEFAULT_TEST_DIR};
    use crate::fem::{OutputWriter, TimeState};
    use russell_lab::Vector;
    use std::fs;
    use std::thread;

    #[test]
    fn round_trip_works() {
        let dir = format!("{}/checkpoint_round_trip", DEFAULT_TEST_DIR);
        fs::remove_dir_all(&dir).ok();
        let manager = CheckpointManager::new(&dir, "solid");
        assert!(manager.load(&SerialComm, &["displacement"]).unwrap().is_none());
        let d = Vector::from(&[1.0, -2.5, 1e-300]);
        let v = Vector::from(&[0.1, 0.2, 0.3]);
        manager.save(&SerialComm, 12, &[("displacement", &d), ("velocity", &v)]).unwrap();
        let (step, fields) = manager.load(&SerialComm, &["displacement", "velocity"]).unwrap().unwrap();
        assert_eq!(step, 12);
        assert_eq!(fields[0].as_data(), d.as_data());
        assert_eq!(fields[1].as_data(), v.as_data());
        assert!(manager.path(12, "velocity").ends_with("000012.solid_checkpoint_velocity"));
    }

    #[test]
    fn field_file_layout_is_length_then_values() {
        let dir = format!("{}/checkpoint_layout", DEFAULT_TEST_DIR);
        fs::remove_dir_all(&dir).ok();
        let manager = CheckpointManager::new(&dir, "fluid");
        let x = Vector::from(&[0.5, -1.0, 2.0]);
        manager.save(&SerialComm, 1, &[("solution", &x)]).unwrap();
        let bytes = fs::read(manager.path(1, "solution")).unwrap();
        assert_eq!(bytes.len(), 8 + 8 * 3);
        assert_eq!(&bytes[0..8], &3u64.to_le_bytes());
        assert_eq!(&bytes[8..16], &0.5f64.to_le_bytes());
        assert_eq!(&bytes[24..32], &2.0f64.to_le_bytes());
    }

    #[test]
    fn load_fails_on_every_rank_if_a_file_is_missing() {
        let dir = format!("{}/checkpoint_missing_file", DEFAULT_TEST_DIR);
        fs::remove_dir_all(&dir).ok();
        let x = Vector::from(&[1.0, 2.0]);
        let comms = LocalComm::create(2);
        let saved: Vec<_> = thread::scope(|s| {
            let handles: Vec<_> = comms
                .iter()
                .map(|comm| {
                    let dir = &dir;
                    let x = &x;
                    s.spawn(move || {
                        let manager = CheckpointManager::new(dir, "solid");
                        manager.save(comm, 4, &[("displacement", x), ("velocity", x)]).is_ok()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(saved, &[true, true]);

        // only rank 0 reads the files; the other rank must not wait forever
        let manager = CheckpointManager::new(&dir, "solid");
        fs::remove_file(manager.path(4, "displacement")).unwrap();
        let errors: Vec<_> = thread::scope(|s| {
            let handles: Vec<_> = comms
                .iter()
                .map(|comm| {
                    let dir = &dir;
                    s.spawn(move || {
                        let manager = CheckpointManager::new(dir, "solid");
                        let res = manager.load(comm, &["displacement", "velocity"]);
                        (comm.rank(), res.err())
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        for (rank, err) in errors {
            let err = err.unwrap();
            if rank == 0 {
                assert!(err.to_string().starts_with("i/o error"));
            } else {
                assert_eq!(
                    err.to_string(),
                    "coupling protocol error: reading the checkpoint failed on another process"
                );
            }
        }
    }

    #[test]
    fn only_the_latest_set_remains() {
        let dir = format!("{}/checkpoint_retention", DEFAULT_TEST_DIR);
        fs::remove_dir_all(&dir).ok();
        let solid = CheckpointManager::new(&dir, "solid");
        let fluid = CheckpointManager::new(&dir, "fluid");
        let x = Vector::from(&[1.0]);
        fluid.save(&SerialComm, 3, &[("solution", &x)]).unwrap();
        for step in [5, 10, 15] {
            solid.save(&SerialComm, step, &[("displacement", &x), ("velocity", &x)]).unwrap();
        }
        let mut names: Vec<_> = fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        names.sort();
        assert_eq!(
            names,
            &[
                "000003.fluid_checkpoint_solution",
                "000015.solid_checkpoint_displacement",
                "000015.solid_checkpoint_velocity",
            ]
        );
        assert_eq!(solid.latest_step().unwrap(), Some(15));
        assert_eq!(fluid.latest_step().unwrap(), Some(3));
    }

    #[test]
    fn replay_output_schedule_works() {
        let mut time = TimeState::new(1.0, 0.1, 0.3, 0.0, 0.0).unwrap();
        let mut writer = OutputWriter::new();
        replay_output_schedule(&mut time, &mut writer, 7);
        assert_eq!(time.step, 7);
        assert_eq!(writer.indices, &[0, 1, 2]);
        assert_eq!(writer.times.len(), 3);
        assert_eq!(writer.times[0], 0.0);
    }
}
