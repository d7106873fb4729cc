//! Log redaction for shareable log files.

use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use regex::Regex;

use crate::targets::extract_username;

/// An [`io::Write`] wrapper masking sensitive substrings before they
/// reach the underlying writer: long numeric post ids, the download
/// root, and target usernames.
pub struct RedactingWriter<W: Write> {
    inner: W,
    rules: Vec<(Regex, &'static str)>,
}

impl<W: Write> RedactingWriter<W> {
    pub fn new(inner: W, download_path: &Path, targets: &[String]) -> Self {
        let mut rules = Vec::new();
        if let Ok(re) = Regex::new(r"\b\d{18,}\b") {
            rules.push((re, "[POST_ID]"));
        }
        let dir = download_path.to_string_lossy();
        if !dir.is_empty() {
            if let Ok(re) = Regex::new(&regex::escape(&dir)) {
                rules.push((re, "[DOWNLOAD_PATH]"));
            }
        }
        for target in targets {
            let username = extract_username(target);
            if username.is_empty() {
                continue;
            }
            if let Ok(re) = Regex::new(&regex::escape(&username)) {
                rules.push((re, "[USERNAME]"));
            }
        }
        Self { inner, rules }
    }
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut message = String::from_utf8_lossy(buf).into_owned();
        for (re, replacement) in &self.rules {
            message = re.replace_all(&message, *replacement).into_owned();
        }
        self.inner.write_all(message.as_bytes())?;
        // Report the original length: the caller's buffer was consumed.
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// A cloneable writer handle for `tracing_subscriber`'s `MakeWriter`.
#[derive(Clone)]
pub struct SharedWriter(Arc<Mutex<Box<dyn Write + Send>>>);

impl SharedWriter {
    pub fn new(inner: Box<dyn Write + Send>) -> Self {
        Self(Arc::new(Mutex::new(inner)))
    }
}

impl Write for SharedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.lock().unwrap().flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn redact(input: &str, download: &str, targets: &[&str]) -> String {
        let mut out = Vec::new();
        {
            let mut w = RedactingWriter::new(
                &mut out,
                Path::new(download),
                &targets.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
            );
            w.write_all(input.as_bytes()).unwrap();
        }
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn masks_long_numeric_ids() {
        assert_eq!(
            redact("archived 731562998877665544332", "", &[]),
            "archived [POST_ID]"
        );
        // Short numbers stay.
        assert_eq!(redact("page 34 of 60", "", &[]), "page 34 of 60");
    }

    #[test]
    fn masks_download_path_and_usernames() {
        let out = redact(
            "wrote /srv/media/carol/file.mp4 for carol",
            "/srv/media",
            &["@carol"],
        );
        assert_eq!(out, "wrote [DOWNLOAD_PATH]/[USERNAME]/file.mp4 for [USERNAME]");
    }
}
