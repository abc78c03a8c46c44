use crate::error::{FsContext, ModError, ModResult};
use crate::manifest::MANIFEST_ENTRY;
use filetime::{set_file_mtime, FileTime};
use std::{
    collections::HashMap,
    fs::{self, File},
    io::{self, Read},
    path::Path,
};
use time::{Date, Month, PrimitiveDateTime, Time as TimeOfDay};
use zip::ZipArchive;

pub type Package = ZipArchive<File>;

pub fn open(path: &Path) -> ModResult<Package> {
    let file = File::open(path).with_fs_context(|| format!("open {}", path.display()))?;
    Ok(ZipArchive::new(file)?)
}

// Top-level `mod.json`, else the first top-level `*.json`.
pub fn find_manifest(archive: &mut Package) -> ModResult<Option<usize>> {
    let mut fallback = None;
    for index in 0..archive.len() {
        let entry = archive.by_index(index)?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().replace('\\', "/");
        let name = name.trim_start_matches("./");
        if name.contains('/') {
            continue;
        }
        if name.eq_ignore_ascii_case(MANIFEST_ENTRY) {
            return Ok(Some(index));
        }
        if fallback.is_none() && name.to_ascii_lowercase().ends_with(".json") {
            fallback = Some(index);
        }
    }
    Ok(fallback)
}

pub fn read_entry_string(archive: &mut Package, index: usize) -> ModResult<String> {
    let mut entry = archive.by_index(index)?;
    let mut raw = String::new();
    entry
        .read_to_string(&mut raw)
        .map_err(|err| ModError::InvalidManifest(format!("{}: {err}", entry.name())))?;
    Ok(raw.trim_start_matches('\u{feff}').to_string())
}

pub fn entry_map(archive: &mut Package) -> ModResult<HashMap<String, usize>> {
    let mut map = HashMap::new();
    for index in 0..archive.len() {
        let entry = archive.by_index(index)?;
        if entry.is_dir() {
            continue;
        }
        let key = entry
            .name()
            .replace('\\', "/")
            .trim_start_matches("./")
            .to_ascii_lowercase();
        map.entry(key).or_insert(index);
    }
    Ok(map)
}

pub fn extract_all(archive: &mut Package, dest: &Path, skip: Option<usize>) -> ModResult<usize> {
    let mut written = 0;
    for index in 0..archive.len() {
        if Some(index) == skip {
            continue;
        }
        let mut file = archive.by_index(index)?;
        let Some(rel) = file.enclosed_name() else {
            continue;
        };
        let out_path = dest.join(rel);
        if file.is_dir() {
            fs::create_dir_all(&out_path).fs_context("create zip dir")?;
            continue;
        }
        let modified = file.last_modified();
        write_entry(&mut file, modified, &out_path)?;
        written += 1;
    }
    Ok(written)
}

pub fn extract_entry(archive: &mut Package, index: usize, out_path: &Path) -> ModResult<()> {
    let mut file = archive.by_index(index)?;
    let modified = file.last_modified();
    write_entry(&mut file, modified, out_path)
}

fn write_entry<R: Read>(
    reader: &mut R,
    modified: Option<zip::DateTime>,
    out_path: &Path,
) -> ModResult<()> {
    if let Some(parent) = out_path.parent() {
        fs::create_dir_all(parent).fs_context("create zip dir")?;
    }
    let mut out_file = File::create(out_path)
        .with_fs_context(|| format!("write {}", out_path.display()))?;
    io::copy(reader, &mut out_file)
        .with_fs_context(|| format!("extract {}", out_path.display()))?;
    drop(out_file);
    if let Some(dt) = modified {
        if let Some(mtime) = zip_time_to_unix(dt) {
            let _ = set_file_mtime(out_path, FileTime::from_unix_time(mtime, 0));
        }
    }
    Ok(())
}

fn zip_time_to_unix(dt: zip::DateTime) -> Option<i64> {
    let month = Month::try_from(dt.month()).ok()?;
    let date = Date::from_calendar_date(dt.year() as i32, month, dt.day()).ok()?;
    let time = TimeOfDay::from_hms(dt.hour(), dt.minute(), dt.second()).ok()?;
    let datetime = PrimitiveDateTime::new(date, time).assume_utc();
    Some(datetime.unix_timestamp())
}

#[cfg(test)]
pub(crate) mod testing {
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;

    pub fn build_zip(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        for (name, contents) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(contents.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }
}
