use crate::base::{FemMesh, DEFAULT_OUT_DIR};
use crate::StrError;
use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::Path;

/// Assists in generating output files
///
/// Each output writes one JSON snapshot `{stem}-{index:0>20}.json`; the
/// summary `{stem}-summary.json` lists the indices and times of all
/// snapshots. The mesh goes to `{stem}-mesh.json`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutputWriter {
    /// Holds a flag to enable/disable the file generation
    enabled: bool,

    /// Defines the output directory
    output_dir: String,

    /// Defines the filename stem
    filename_stem: String,

    /// Holds the count of files written
    output_count: usize,

    /// Holds the indices of the output files
    pub indices: Vec<usize>,

    /// Holds the simulation times corresponding to each output file
    pub times: Vec<f64>,
}

impl OutputWriter {
    /// Allocates a new instance with deactivated generation of files
    ///
    /// The bookkeeping (indices and times) is still recorded.
    pub fn new() -> Self {
        OutputWriter {
            enabled: false,
            output_dir: String::new(),
            filename_stem: String::new(),
            output_count: 0,
            indices: Vec::new(),
            times: Vec::new(),
        }
    }

    /// Allocates a new instance given a mesh
    ///
    /// # Input
    ///
    /// * `fem` -- the mesh and its boundary faces
    /// * `filename_stem` -- the last part of the filename without extension, e.g., "my_simulation"
    /// * `output_directory` -- the directory to save the output files.
    ///   None means that the default directory will be used; see [DEFAULT_OUT_DIR]
    pub fn new_enabled(fem: &FemMesh, filename_stem: &str, output_directory: Option<&str>) -> Result<Self, StrError> {
        let out_dir = output_directory.unwrap_or(DEFAULT_OUT_DIR);
        fs::create_dir_all(out_dir).map_err(|_| "cannot create output directory")?;
        let mut writer = OutputWriter::new();
        writer.enabled = true;
        writer.output_dir = out_dir.to_string();
        writer.filename_stem = filename_stem.to_string();
        write_json(fem, &writer.path_mesh())?;
        Ok(writer)
    }

    /// Returns true if files are written
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Returns the number of outputs recorded so far
    pub fn count(&self) -> usize {
        self.output_count
    }

    /// Generates the filename path for the mesh file
    pub fn path_mesh(&self) -> String {
        if self.enabled {
            format!("{}/{}-mesh.json", self.output_dir, self.filename_stem)
        } else {
            "".to_string()
        }
    }

    /// Generates the filename path for the summary file
    pub fn path_summary(&self) -> String {
        if self.enabled {
            format!("{}/{}-summary.json", self.output_dir, self.filename_stem)
        } else {
            "".to_string()
        }
    }

    /// Generates the filename path for the state files
    pub fn path_state(&self, index: usize) -> String {
        if self.enabled {
            format!("{}/{}-{:0>20}.json", self.output_dir, self.filename_stem, index)
        } else {
            "".to_string()
        }
    }

    /// Records an output at time `t` without writing anything
    ///
    /// This is used to replay the bookkeeping after loading a checkpoint.
    pub fn record(&mut self, t: f64) {
        self.indices.push(self.output_count);
        self.times.push(t);
        self.output_count += 1;
    }

    /// Writes a snapshot and records it
    pub fn write_snapshot<T>(&mut self, snapshot: &T, t: f64) -> Result<(), StrError>
    where
        T: Serialize,
    {
        if self.enabled {
            write_json(snapshot, &self.path_state(self.output_count))?;
        }
        self.record(t);
        Ok(())
    }

    /// Writes the summary file
    pub fn write_summary(&self) -> Result<(), StrError> {
        if self.enabled {
            write_json(self, &self.path_summary())?;
        }
        Ok(())
    }

    /// Reads a JSON file containing this struct
    ///
    /// # Input
    ///
    /// * `full_path` -- may be a String, &str, or Path
    pub fn read_json<P>(full_path: &P) -> Result<Self, StrError>
    where
        P: AsRef<OsStr> + ?Sized,
    {
        let path = Path::new(full_path).to_path_buf();
        let file = File::open(path).map_err(|_| "cannot open file")?;
        let buffered = BufReader::new(file);
        let summary = serde_json::from_reader(buffered).map_err(|_| "cannot parse JSON file")?;
        Ok(summary)
    }
}

/// Writes any serializable value to a JSON file, creating the directory if needed
pub fn write_json<T, P>(value: &T, full_path: &P) -> Result<(), StrError>
where
    T: Serialize,
    P: AsRef<OsStr> + ?Sized,
{
    let path = Path::new(full_path).to_path_buf();
    if let Some(p) = path.parent() {
        fs::create_dir_all(p).map_err(|_| "cannot create directory")?;
    }
    let mut file = File::create(&path).map_err(|_| "cannot create file")?;
    serde_json::to_writer(&mut file, value).map_err(|_| "cannot write file")?;
    Ok(())
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::OutputWriter;
    use crate::base::{SampleMeshes, DEFAULT_TEST_DIR};
    use gemlab::shapes::GeoKind;
    use std::path::Path;

    #[test]
    fn disabled_writer_keeps_bookkeeping() {
        let mut writer = OutputWriter::new();
        assert!(!writer.enabled());
        assert_eq!(writer.path_mesh(), "");
        assert_eq!(writer.path_state(0), "");
        writer.write_snapshot(&vec![1.0, 2.0], 0.5).unwrap();
        writer.write_snapshot(&vec![1.0, 2.0], 1.0).unwrap();
        assert_eq!(writer.indices, &[0, 1]);
        assert_eq!(writer.times, &[0.5, 1.0]);
        writer.write_summary().unwrap();
    }

    #[test]
    fn enabled_writer_writes_files() {
        let fem = SampleMeshes::rectangle(1, 1, 1.0, 1.0, GeoKind::Qua4, 1).unwrap();
        let mut writer = OutputWriter::new_enabled(&fem, "output_writer", Some(DEFAULT_TEST_DIR)).unwrap();
        assert!(Path::new(&writer.path_mesh()).exists());
        assert_eq!(
            writer.path_state(3),
            format!("{}/output_writer-00000000000000000003.json", DEFAULT_TEST_DIR)
        );
        writer.write_snapshot(&vec![0.0; 4], 0.0).unwrap();
        writer.write_summary().unwrap();
        assert!(Path::new(&writer.path_state(0)).exists());
        let summary = OutputWriter::read_json(&writer.path_summary()).unwrap();
        assert_eq!(summary.indices, &[0]);
        assert_eq!(summary.count(), 1);
    }
}
