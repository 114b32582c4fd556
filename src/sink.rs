//! Local audio sinks fed by the receive relay
//!
//! - [`PipeSourceSink`]: a PulseAudio `module-pipe-source` backed by a FIFO,
//!   so received audio shows up as a microphone on the desktop
//! - [`WriterSink`]: any [`Write`] implementation, e.g. standard output

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::Command;

use crate::config::SinkConfig;
use crate::error::SinkError;

/// A destination for received PCM bytes.
pub trait LocalSink: Send {
    /// Human-readable name for logging.
    fn name(&self) -> &str;

    /// Acquire the sink. Called once before any audio is written.
    fn attach(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    /// Write some prefix of `data`, returning how many bytes were taken.
    fn write(&mut self, data: &[u8]) -> io::Result<usize>;

    /// Release the sink. Called once after the last write.
    fn detach(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    /// Write the whole of `data`, retrying partial and interrupted writes.
    fn write_all(&mut self, mut data: &[u8]) -> Result<(), SinkError> {
        while !data.is_empty() {
            match self.write(data) {
                Ok(0) => {
                    return Err(SinkError::WriteFailed(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "sink accepted no bytes",
                    )))
                }
                Ok(n) => data = &data[n..],
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(SinkError::WriteFailed(e)),
            }
        }
        Ok(())
    }
}

impl<S: LocalSink + ?Sized> LocalSink for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn attach(&mut self) -> Result<(), SinkError> {
        (**self).attach()
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        (**self).write(data)
    }

    fn detach(&mut self) -> Result<(), SinkError> {
        (**self).detach()
    }
}

/// Build the sink described by `config`.
pub fn from_config(config: &SinkConfig) -> Box<dyn LocalSink> {
    match config {
        SinkConfig::Pipe {
            source_name,
            path,
            sample_rate,
        } => Box::new(PipeSourceSink::new(source_name, path.clone(), *sample_rate)),
        SinkConfig::Stdout => Box::new(WriterSink::new("stdout", io::stdout())),
    }
}

/// Sink over any writer
pub struct WriterSink<W> {
    name: String,
    writer: W,
}

impl<W: Write + Send> WriterSink<W> {
    pub fn new(name: impl Into<String>, writer: W) -> Self {
        Self {
            name: name.into(),
            writer,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> LocalSink for WriterSink<W> {
    fn name(&self) -> &str {
        &self.name
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.writer.write(data)
    }

    fn detach(&mut self) -> Result<(), SinkError> {
        self.writer
            .flush()
            .map_err(|e| SinkError::DetachFailed(e.to_string()))
    }
}

/// PulseAudio pipe source fed through a FIFO
pub struct PipeSourceSink {
    source_name: String,
    path: PathBuf,
    sample_rate: u32,
    /// Module index printed by `pactl load-module`
    module: Option<String>,
    pipe: Option<File>,
}

impl PipeSourceSink {
    pub fn new(source_name: impl Into<String>, path: PathBuf, sample_rate: u32) -> Self {
        Self {
            source_name: source_name.into(),
            path,
            sample_rate,
            module: None,
            pipe: None,
        }
    }

    fn load_module(&self) -> Result<String, SinkError> {
        let output = pactl(&[
            "load-module",
            "module-pipe-source",
            &format!("source_name={}", self.source_name),
            &format!("file={}", self.path.display()),
            "format=s16le",
            &format!("rate={}", self.sample_rate),
            "channels=1",
        ])
        .map_err(SinkError::AttachFailed)?;

        let index = output.trim();
        if index.is_empty() {
            // Older pactl prints nothing; fall back to unloading by name
            Ok("module-pipe-source".to_string())
        } else {
            Ok(index.to_string())
        }
    }

    fn unload_module(module: &str) -> Result<(), SinkError> {
        pactl(&["unload-module", module])
            .map(|_| ())
            .map_err(SinkError::DetachFailed)
    }
}

impl LocalSink for PipeSourceSink {
    fn name(&self) -> &str {
        &self.source_name
    }

    fn attach(&mut self) -> Result<(), SinkError> {
        if self.pipe.is_some() {
            return Ok(());
        }

        let module = self.load_module()?;

        // Blocks until the pipe source opens its end, which it already has
        let pipe = match OpenOptions::new().write(true).open(&self.path) {
            Ok(pipe) => pipe,
            Err(e) => {
                if let Err(unload) = Self::unload_module(&module) {
                    tracing::warn!("{}", unload);
                }
                return Err(SinkError::AttachFailed(format!(
                    "open {}: {}",
                    self.path.display(),
                    e
                )));
            }
        };

        // The open descriptor keeps the FIFO alive
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!("Failed to unlink {}: {}", self.path.display(), e);
        }

        tracing::info!(
            "Attached pipe source '{}' (module {}, {} Hz mono s16le)",
            self.source_name,
            module,
            self.sample_rate
        );

        self.module = Some(module);
        self.pipe = Some(pipe);
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        match self.pipe.as_mut() {
            Some(pipe) => pipe.write(data),
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                SinkError::NotAttached.to_string(),
            )),
        }
    }

    fn detach(&mut self) -> Result<(), SinkError> {
        self.pipe = None;

        let Some(module) = self.module.take() else {
            return Ok(());
        };
        Self::unload_module(&module)?;
        tracing::info!("Detached pipe source '{}'", self.source_name);
        Ok(())
    }
}

impl Drop for PipeSourceSink {
    fn drop(&mut self) {
        if let Err(e) = self.detach() {
            tracing::warn!("{}", e);
        }
    }
}

/// Run `pactl` and return its standard output.
fn pactl(args: &[&str]) -> Result<String, String> {
    let output = Command::new("pactl")
        .args(args)
        .output()
        .map_err(|e| format!("failed to run pactl: {}", e))?;

    if !output.status.success() {
        return Err(format!(
            "pactl {} exited with {}: {}",
            args.first().copied().unwrap_or_default(),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Accepts at most `chunk` bytes per call and fails every other call
    /// with `Interrupted`.
    struct Stingy {
        chunk: usize,
        interrupt: bool,
        written: Vec<u8>,
    }

    impl Write for Stingy {
        fn write(&mut self, data: &[u8]) -> io::Result<usize> {
            self.interrupt = !self.interrupt;
            if self.interrupt {
                return Err(io::ErrorKind::Interrupted.into());
            }
            let n = data.len().min(self.chunk);
            self.written.extend_from_slice(&data[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct Closed;

    impl Write for Closed {
        fn write(&mut self, _data: &[u8]) -> io::Result<usize> {
            Err(io::ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_write_all_retries_partial_writes() {
        let mut sink = WriterSink::new(
            "stingy",
            Stingy {
                chunk: 100,
                interrupt: false,
                written: Vec::new(),
            },
        );
        let data: Vec<u8> = (0..=255).cycle().take(640).collect();

        sink.write_all(&data).unwrap();
        assert_eq!(sink.into_inner().written, data);
    }

    #[test]
    fn test_write_errors_are_reported() {
        let mut sink = WriterSink::new("closed", Closed);
        let err = sink.write_all(&[0u8; 640]).unwrap_err();
        assert!(matches!(err, SinkError::WriteFailed(ref e) if e.kind() == io::ErrorKind::BrokenPipe));
    }

    #[test]
    fn test_unattached_pipe_refuses_writes() {
        let mut sink = PipeSourceSink::new("test", std::env::temp_dir().join("never.pipe"), 16000);
        assert!(sink.write_all(&[1, 2]).is_err());
        assert!(sink.detach().is_ok());
    }

    #[test]
    fn test_boxed_sink_forwards() {
        let mut sink: Box<dyn LocalSink> = Box::new(WriterSink::new("vec", Vec::new()));
        sink.attach().unwrap();
        sink.write_all(b"pcm").unwrap();
        sink.detach().unwrap();
        assert_eq!(sink.name(), "vec");
    }
}
