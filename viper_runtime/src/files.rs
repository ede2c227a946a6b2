//! File I/O runtime functions
//!
//! Open files live in the runtime state as nonzero handles; handle zero is
//! null. Failure is reported to IL through the bridge's err-out slot, so the
//! implementations here just return `RtError`.

use crate::error::{RtError, RtResult};
use crate::{RtArg, RtState};
use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind, Write};

#[derive(Debug)]
pub enum FileEntry {
    Reader(BufReader<File>),
    Writer(File),
}

fn entry_index(handle: u64) -> RtResult<usize> {
    if handle == 0 {
        return Err(RtError::invalid_operation("null file handle"));
    }
    Ok((handle - 1) as usize)
}

fn install(state: &mut RtState, entry: FileEntry) -> u64 {
    let files = state.files_mut();
    for (index, slot) in files.iter_mut().enumerate() {
        if slot.is_none() {
            *slot = Some(entry);
            return index as u64 + 1;
        }
    }
    files.push(Some(entry));
    files.len() as u64
}

pub fn rt_file_open(state: &mut RtState, args: &[RtArg]) -> RtResult<RtArg> {
    let path = state.str_value(args[0].as_str_handle()?)?.to_string();
    let file = File::open(&path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => RtError::file_not_found(&path),
        _ => RtError::io(format!("open {}: {}", path, e)),
    })?;
    let handle = install(state, FileEntry::Reader(BufReader::new(file)));
    log::debug!("opened {} as handle {}", path, handle);
    Ok(RtArg::Handle(handle))
}

pub fn rt_file_create(state: &mut RtState, args: &[RtArg]) -> RtResult<RtArg> {
    let path = state.str_value(args[0].as_str_handle()?)?.to_string();
    let file = File::create(&path).map_err(|e| RtError::io(format!("create {}: {}", path, e)))?;
    let handle = install(state, FileEntry::Writer(file));
    Ok(RtArg::Handle(handle))
}

/// Read one line without its newline; EOF is an error the program can catch
pub fn rt_file_read_line(state: &mut RtState, args: &[RtArg]) -> RtResult<RtArg> {
    let index = entry_index(args[0].as_handle()?)?;
    let mut line = String::new();
    {
        let entry = state
            .files_mut()
            .get_mut(index)
            .and_then(|slot| slot.as_mut())
            .ok_or_else(|| RtError::invalid_operation("closed file handle"))?;
        let reader = match entry {
            FileEntry::Reader(reader) => reader,
            FileEntry::Writer(_) => return Err(RtError::invalid_operation("read from write-only file")),
        };
        let read = reader.read_line(&mut line).map_err(|e| RtError::io(e.to_string()))?;
        if read == 0 {
            return Err(RtError::eof());
        }
    }
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    Ok(RtArg::Str(state.alloc_str(line)))
}

pub fn rt_file_write(state: &mut RtState, args: &[RtArg]) -> RtResult<RtArg> {
    let index = entry_index(args[0].as_handle()?)?;
    let text = state.str_value(args[1].as_str_handle()?)?.to_string();
    let entry = state
        .files_mut()
        .get_mut(index)
        .and_then(|slot| slot.as_mut())
        .ok_or_else(|| RtError::invalid_operation("closed file handle"))?;
    match entry {
        FileEntry::Writer(file) => {
            file.write_all(text.as_bytes()).map_err(|e| RtError::io(e.to_string()))?;
            Ok(RtArg::Unit)
        }
        FileEntry::Reader(_) => Err(RtError::invalid_operation("write to read-only file")),
    }
}

pub fn rt_file_close(state: &mut RtState, args: &[RtArg]) -> RtResult<RtArg> {
    let index = entry_index(args[0].as_handle()?)?;
    match state.files_mut().get_mut(index) {
        Some(slot @ Some(_)) => {
            *slot = None;
            Ok(RtArg::Unit)
        }
        _ => Err(RtError::invalid_operation("closed file handle")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RtErrCode;
    use std::io::Write as _;

    fn state() -> RtState {
        RtState::with_output(Box::new(Vec::new()))
    }

    #[test]
    fn test_open_missing_file() {
        let mut state = state();
        let path = state.alloc_str("/definitely/not/here.txt");
        let err = rt_file_open(&mut state, &[RtArg::Str(path)]).unwrap_err();
        assert_eq!(err.code, RtErrCode::FileNotFound);
    }

    #[test]
    fn test_read_lines_until_eof() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "first").unwrap();
        writeln!(file, "second").unwrap();
        file.flush().unwrap();

        let mut state = state();
        let path = state.alloc_str(file.path().to_str().unwrap());
        let handle = rt_file_open(&mut state, &[RtArg::Str(path)]).unwrap();

        let first = rt_file_read_line(&mut state, &[handle]).unwrap();
        match first {
            RtArg::Str(h) => assert_eq!(state.str_value(h).unwrap(), "first"),
            other => panic!("expected string, got {:?}", other),
        }
        rt_file_read_line(&mut state, &[handle]).unwrap();

        let err = rt_file_read_line(&mut state, &[handle]).unwrap_err();
        assert_eq!(err.code, RtErrCode::Eof);
    }

    #[test]
    fn test_write_and_close() {
        let dir = tempfile::tempdir().unwrap();
        let path_buf = dir.path().join("out.txt");

        let mut state = state();
        let path = state.alloc_str(path_buf.to_str().unwrap());
        let handle = rt_file_create(&mut state, &[RtArg::Str(path)]).unwrap();
        let text = state.alloc_str("line one\n");
        rt_file_write(&mut state, &[handle, RtArg::Str(text)]).unwrap();
        rt_file_close(&mut state, &[handle]).unwrap();

        assert_eq!(std::fs::read_to_string(&path_buf).unwrap(), "line one\n");

        let err = rt_file_write(&mut state, &[handle, RtArg::Str(text)]).unwrap_err();
        assert_eq!(err.code, RtErrCode::InvalidOperation);
    }

    #[test]
    fn test_null_handle_rejected() {
        let mut state = state();
        let err = rt_file_close(&mut state, &[RtArg::Handle(0)]).unwrap_err();
        assert_eq!(err.code, RtErrCode::InvalidOperation);
    }
}
