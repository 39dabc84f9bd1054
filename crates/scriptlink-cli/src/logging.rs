use std::{
    env,
    fs::OpenOptions,
    io::{self, Write},
    path::PathBuf,
    sync::{Arc, Mutex, MutexGuard},
};
use tracing_subscriber::{fmt::writer::BoxMakeWriter, EnvFilter};

type SharedFile = Arc<Mutex<std::fs::File>>;

pub struct LogGuard {
    file: Option<SharedFile>,
}

impl Drop for LogGuard {
    fn drop(&mut self) {
        if let Some(file) = &self.file {
            let _ = lock(file).flush();
        }
    }
}

struct MultiWriter {
    stderr_enabled: bool,
    file: Option<SharedFile>,
}

impl Write for MultiWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.stderr_enabled {
            let _ = io::stderr().write_all(buf);
        }
        if let Some(file) = &self.file {
            let _ = lock(file).write_all(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.stderr_enabled {
            let _ = io::stderr().flush();
        }
        if let Some(file) = &self.file {
            let _ = lock(file).flush();
        }
        Ok(())
    }
}

fn lock(file: &SharedFile) -> MutexGuard<'_, std::fs::File> {
    file.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub fn init_logging(log_dir: &str, label: &str, stderr_enabled: bool) -> Option<LogGuard> {
    let level = env::var("SCRIPTLINK_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let guard = match open_log_file(log_dir, label) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("log_file_error: {err}");
            LogGuard { file: None }
        }
    };
    // Without a file, stderr is the only place left to log to.
    let stderr_enabled = stderr_enabled || guard.file.is_none();
    let file = guard.file.clone();
    let make_writer = BoxMakeWriter::new(move || MultiWriter {
        stderr_enabled,
        file: file.clone(),
    });
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(make_writer)
        .with_ansi(false)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return None;
    }
    Some(guard)
}

fn open_log_file(log_dir: &str, label: &str) -> io::Result<LogGuard> {
    if log_dir.trim().is_empty() {
        return Ok(LogGuard { file: None });
    }
    let dir = PathBuf::from(log_dir);
    std::fs::create_dir_all(&dir)?;
    let path = dir.join(format!("scriptlink-{}.log", sanitize_component(label)));
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(LogGuard {
        file: Some(Arc::new(Mutex::new(file))),
    })
}

pub fn sanitize_component(input: &str) -> String {
    input
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_component_replaces_path_characters() {
        assert_eq!(sanitize_component("127.0.0.1:9222/page"), "127_0_0_1_9222_page");
        assert_eq!(sanitize_component("pid-42_a"), "pid-42_a");
    }

    #[test]
    fn empty_log_dir_means_no_file() {
        let guard = open_log_file("  ", "x").expect("no file");
        assert!(guard.file.is_none());
    }
}
