use std::io::Write;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{json, Map, Value};

use crate::archive::item::{FileType, Item};
use crate::archive::{self, SourceArchiveMeta};
use crate::repo::Repository;
use vger_types::error::{Result, VgerError};

const ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f%:z";
const NAIVE_ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

pub fn format_timestamp(t: &DateTime<Utc>) -> String {
    t.format(ISO_FORMAT).to_string()
}

/// Legacy timestamps carry no offset and are shown as recorded.
pub fn format_naive_timestamp(t: &NaiveDateTime) -> String {
    t.format(NAIVE_ISO_FORMAT).to_string()
}

/// Manifest listing:
/// `{"repository": {..}, "encryption": {..}, "archives": [{..}, ..]}`.
pub fn repo_listing_json(repo: &Repository) -> Result<Value> {
    let mut archives = Vec::with_capacity(repo.manifest().archives.len());
    for entry in &repo.manifest().archives {
        let mut obj = Map::new();
        obj.insert("id".into(), json!(entry.id.to_hex()));
        obj.insert("name".into(), json!(entry.name));
        match archive::load_archive(repo, entry)? {
            SourceArchiveMeta::Current(m) => {
                obj.insert("start".into(), json!(format_timestamp(&m.start)));
                obj.insert("time".into(), json!(format_timestamp(&m.time)));
                obj.insert("hostname".into(), json!(m.hostname));
                obj.insert("username".into(), json!(m.username));
                if let Some(comment) = m.comment {
                    obj.insert("comment".into(), json!(comment));
                }
            }
            SourceArchiveMeta::Legacy(m) => {
                obj.insert("start".into(), json!(format_naive_timestamp(&m.time)));
                obj.insert("time".into(), json!(format_naive_timestamp(&m.time_end)));
                obj.insert("hostname".into(), json!(m.hostname));
                obj.insert("username".into(), json!(m.username));
                if let Some(comment) = m.comment.filter(|c| !c.is_empty()) {
                    obj.insert("comment".into(), json!(comment));
                }
                obj.insert("legacy".into(), json!(true));
            }
        }
        archives.push(Value::Object(obj));
    }

    Ok(json!({
        "repository": { "id": repo.id_hex() },
        "encryption": { "mode": repo.config.encryption.as_str() },
        "archives": archives,
    }))
}

/// One JSON object per item and line. Keys appear only when the item has
/// the attribute.
pub fn write_items_json_lines(
    repo: &Repository,
    archive_name: &str,
    out: &mut dyn Write,
) -> Result<()> {
    for item in archive::load_items(repo, archive_name)? {
        let line = serde_json::to_string(&item_json(&item))
            .map_err(|e| VgerError::Other(format!("json encode: {e}")))?;
        writeln!(out, "{line}")?;
    }
    Ok(())
}

pub fn item_json(item: &Item) -> Value {
    let mut obj = Map::new();
    obj.insert("path".into(), json!(item.path));
    if let Some(file_type) = item.file_type() {
        obj.insert("type".into(), json!(file_type.type_char().to_string()));
    }
    obj.insert("mode".into(), json!(format_mode(item.mode)));
    if let Some(uid) = item.uid {
        obj.insert("uid".into(), json!(uid));
    }
    if let Some(gid) = item.gid {
        obj.insert("gid".into(), json!(gid));
    }
    if item.user.is_some() || item.uid.is_some() {
        obj.insert("user".into(), json!(item.display_user()));
    }
    if item.group.is_some() || item.gid.is_some() {
        obj.insert("group".into(), json!(item.display_group()));
    }
    if let Some(size) = item.size {
        obj.insert("size".into(), json!(size));
    }
    obj.insert("mtime".into(), json!(format_timestamp(&item.mtime)));
    if let Some(atime) = &item.atime {
        obj.insert("atime".into(), json!(format_timestamp(atime)));
    }
    if let Some(ctime) = &item.ctime {
        obj.insert("ctime".into(), json!(format_timestamp(ctime)));
    }
    if let Some(hlid) = &item.hlid {
        obj.insert("hlid".into(), json!(hlid.to_hex()));
    }
    if let Some(source) = &item.source {
        obj.insert("source".into(), json!(source));
        obj.insert("linktarget".into(), json!(source));
    }
    if let Some(flags) = item.bsdflags {
        obj.insert("bsdflags".into(), json!(flags));
    }
    if let Some(rdev) = item.rdev {
        obj.insert("rdev".into(), json!(rdev));
    }
    if let Some(xattrs) = &item.xattrs {
        obj.insert("xattrs".into(), json!(xattrs.keys().collect::<Vec<_>>()));
    }
    Value::Object(obj)
}

/// `ls -l` style line: mode, owner, group, size, mtime, path.
pub fn format_item_line(item: &Item) -> String {
    let mut line = format!(
        "{} {:<8} {:<8} {:>10} {} {}",
        format_mode(item.mode),
        item.display_user(),
        item.display_group(),
        item.size.unwrap_or(0),
        item.mtime.format("%Y-%m-%d %H:%M:%S"),
        item.path
    );
    if let (Some(FileType::Symlink), Some(target)) = (item.file_type(), &item.source) {
        line.push_str(" -> ");
        line.push_str(target);
    }
    line
}

/// `-rwxr-xr-x` style rendering, including setuid, setgid and sticky bits.
pub fn format_mode(mode: u32) -> String {
    let mut s = String::with_capacity(10);
    s.push(FileType::from_mode(mode).map_or('?', FileType::type_char));
    let bits = [
        (0o400, 'r'),
        (0o200, 'w'),
        (0o100, 'x'),
        (0o040, 'r'),
        (0o020, 'w'),
        (0o010, 'x'),
        (0o004, 'r'),
        (0o002, 'w'),
        (0o001, 'x'),
    ];
    for (bit, ch) in bits {
        s.push(if mode & bit != 0 { ch } else { '-' });
    }
    let mut chars: Vec<char> = s.chars().collect();
    for (special, pos, set_exec, set_plain) in [
        (0o4000, 3, 's', 'S'),
        (0o2000, 6, 's', 'S'),
        (0o1000, 9, 't', 'T'),
    ] {
        if mode & special != 0 {
            chars[pos] = if chars[pos] == 'x' { set_exec } else { set_plain };
        }
    }
    chars.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::item::{S_IFDIR, S_IFLNK, S_IFREG};

    #[test]
    fn mode_strings() {
        assert_eq!(format_mode(S_IFREG | 0o644), "-rw-r--r--");
        assert_eq!(format_mode(S_IFDIR | 0o755), "drwxr-xr-x");
        assert_eq!(format_mode(S_IFLNK | 0o777), "lrwxrwxrwx");
        assert_eq!(format_mode(S_IFREG | 0o4755), "-rwsr-xr-x");
        assert_eq!(format_mode(S_IFDIR | 0o1777), "drwxrwxrwt");
        assert_eq!(format_mode(S_IFREG | 0o1644), "-rw-r--r-T");
    }

    #[test]
    fn timestamps_keep_microseconds_and_offset() {
        let t = DateTime::parse_from_rfc3339("2022-03-01T10:20:30.123456Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(format_timestamp(&t), "2022-03-01T10:20:30.123456+00:00");
    }
}
