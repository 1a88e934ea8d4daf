//! Chunked paste file writer.
//!
//! Blocks are appended to `paste_0001.txt`, `paste_0002.txt`, ... and a new
//! file is opened whenever the next block would push the current one past
//! the line budget. A single block larger than the budget gets a file of
//! its own.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use rtools_shared::{Result, RtoolsError};
use sha2::{Digest, Sha256};

/// Smallest accepted line budget per output file.
pub const MIN_MAX_LINES: usize = 50;

pub const BEGIN_FILE: &str = "===== BEGIN FILE =====";
pub const END_FILE: &str = "===== END FILE =====";
pub const BEGIN_CODE: &str = "----- BEGIN CODE -----";
pub const END_CODE: &str = "----- END CODE -----";

/// Lines of framing around each block's content.
const FRAME_LINES: usize = 8;

pub struct ChunkWriter {
    out_dir: PathBuf,
    max_lines: usize,
    current: Option<BufWriter<File>>,
    current_path: PathBuf,
    current_lines: usize,
    index: usize,
    written: Vec<PathBuf>,
}

impl ChunkWriter {
    pub fn new(out_dir: &Path, max_lines: usize) -> Result<Self> {
        std::fs::create_dir_all(out_dir).map_err(|e| RtoolsError::io(out_dir, e))?;
        Ok(Self {
            out_dir: out_dir.to_path_buf(),
            max_lines: max_lines.max(MIN_MAX_LINES),
            current: None,
            current_path: PathBuf::new(),
            current_lines: 0,
            index: 0,
            written: Vec::new(),
        })
    }

    pub fn max_lines(&self) -> usize {
        self.max_lines
    }

    fn open_next(&mut self) -> Result<()> {
        self.flush_current()?;
        self.index += 1;
        let path = self.out_dir.join(format!("paste_{:04}.txt", self.index));
        let file = File::create(&path).map_err(|e| RtoolsError::io(&path, e))?;
        self.current = Some(BufWriter::new(file));
        self.current_path = path.clone();
        self.current_lines = 0;
        self.written.push(path);
        Ok(())
    }

    fn flush_current(&mut self) -> Result<()> {
        if let Some(mut writer) = self.current.take() {
            writer
                .flush()
                .map_err(|e| RtoolsError::io(&self.current_path, e))?;
        }
        Ok(())
    }

    /// Append one file block. `content` should not end with a newline.
    pub fn write_block(
        &mut self,
        rel: &str,
        content: &str,
        chunk_idx: usize,
        chunk_total: usize,
    ) -> Result<()> {
        let lines: Vec<&str> = content.lines().collect();
        let needed = FRAME_LINES + lines.len();
        if self.current.is_none() || self.current_lines + needed > self.max_lines {
            self.open_next()?;
        }

        let sha = format!("{:x}", Sha256::digest(content.as_bytes()));
        let mut block = String::with_capacity(content.len() + 256);
        for line in [
            BEGIN_FILE.to_string(),
            format!("PATH: {rel}"),
            format!("LINES: {}", lines.len()),
            format!("CHUNK: {chunk_idx}/{chunk_total}"),
            format!("SHA256: {sha}"),
            BEGIN_CODE.to_string(),
        ] {
            block.push_str(&line);
            block.push('\n');
        }
        for line in &lines {
            block.push_str(line);
            block.push('\n');
        }
        block.push_str(END_CODE);
        block.push('\n');
        block.push_str(END_FILE);
        block.push('\n');

        let path = self.current_path.clone();
        if let Some(writer) = self.current.as_mut() {
            writer
                .write_all(block.as_bytes())
                .map_err(|e| RtoolsError::io(&path, e))?;
        }
        self.current_lines += needed;
        Ok(())
    }

    /// Flush and return the files written, in order.
    pub fn finish(mut self) -> Result<Vec<PathBuf>> {
        self.flush_current()?;
        Ok(std::mem::take(&mut self.written))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_roll_over_to_new_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut writer = ChunkWriter::new(dir.path(), 10).expect("writer");
        assert_eq!(writer.max_lines(), MIN_MAX_LINES);

        let body: String = (0..30).map(|i| format!("line {i}\n")).collect();
        let body = body.trim_end();
        writer.write_block("a.txt", body, 1, 2).expect("write");
        writer.write_block("b.txt", body, 2, 2).expect("write");
        let files = writer.finish().expect("finish");
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("paste_0001.txt"));
        assert!(files[1].ends_with("paste_0002.txt"));

        let first = std::fs::read_to_string(&files[0]).expect("read");
        assert!(
            first.starts_with("===== BEGIN FILE =====\nPATH: a.txt\nLINES: 30\nCHUNK: 1/2\nSHA256: ")
        );
        assert_eq!(first.lines().count(), 38);
        assert!(first.ends_with("----- END CODE -----\n===== END FILE =====\n"));
    }

    #[test]
    fn sha_is_of_the_content() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut writer = ChunkWriter::new(dir.path(), 4000).expect("writer");
        writer.write_block("x", "abc", 1, 1).expect("write");
        let files = writer.finish().expect("finish");
        let text = std::fs::read_to_string(&files[0]).expect("read");
        assert!(text.contains(
            "SHA256: ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        ));
    }
}
