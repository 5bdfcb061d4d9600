//! Minimal txtar archives: an optional comment followed by named sections.
//!
//! ```text
//! -- request.bin.http --
//! GET http://example.com/ HTTP/1.1
//! ...
//! -- response.bin.http --
//! HTTP/1.1 200 OK
//! ...
//! ```
//!
//! Every section's data is followed by one newline when formatted, and
//! exactly one trailing newline is removed when parsing, so section data
//! round-trips byte-for-byte.

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Archive {
    pub comment: Vec<u8>,
    pub files: Vec<File>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    pub name: String,
    pub data: Vec<u8>,
}

impl Archive {
    pub fn file(&self, name: &str) -> Option<&File> {
        self.files.iter().find(|f| f.name == name)
    }
}

pub fn format(archive: &Archive) -> Vec<u8> {
    let mut out = Vec::new();
    if !archive.comment.is_empty() {
        out.extend_from_slice(&archive.comment);
        if !archive.comment.ends_with(b"\n") {
            out.push(b'\n');
        }
    }
    for file in &archive.files {
        out.extend_from_slice(format!("-- {} --\n", file.name).as_bytes());
        out.extend_from_slice(&file.data);
        out.push(b'\n');
    }
    out
}

fn marker_name(line: &[u8]) -> Option<String> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let inner = line.strip_prefix(b"-- ")?.strip_suffix(b" --")?;
    let name = std::str::from_utf8(inner).ok()?.trim();
    (!name.is_empty()).then(|| name.to_string())
}

pub fn parse(data: &[u8]) -> Archive {
    let mut archive = Archive::default();
    let mut current: Option<File> = None;
    let mut section = Vec::new();

    let mut rest = data;
    while !rest.is_empty() {
        let (line, next) = match rest.iter().position(|&b| b == b'\n') {
            Some(pos) => (&rest[..=pos], &rest[pos + 1..]),
            None => (rest, &rest[rest.len()..]),
        };
        rest = next;

        let bare = line.strip_suffix(b"\n").unwrap_or(line);
        if let Some(name) = marker_name(bare) {
            close_section(&mut archive, current.take(), std::mem::take(&mut section));
            current = Some(File {
                name,
                data: Vec::new(),
            });
            continue;
        }
        section.extend_from_slice(line);
    }
    close_section(&mut archive, current, section);
    archive
}

fn close_section(archive: &mut Archive, file: Option<File>, mut data: Vec<u8>) {
    match file {
        Some(mut file) => {
            if data.ends_with(b"\n") {
                data.pop();
            }
            file.data = data;
            archive.files.push(file);
        }
        None => archive.comment = data,
    }
}
