//-
// Copyright (c) 2026, Mailfront Developers
//
// This file is part of Mailfront.
//
// Mailfront is free software: you can  redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Mailfront is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Mailfront. If not, see <http://www.gnu.org/licenses/>.

//! Miscellaneous functions for working with files.

use std::fs;
use std::io::{self, Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

/// Write `data` into the file at `path`, atomically.
///
/// The file will first be staged within `tmp`, which must be on the same file
/// system as `path`. Anything already at `path` is replaced.
pub fn spit(
    tmp: impl AsRef<Path>,
    path: impl AsRef<Path>,
    mode: u32,
    data: &[u8],
) -> io::Result<()> {
    let mut tf = tempfile::NamedTempFile::new_in(tmp)?;
    tf.as_file_mut().write_all(data)?;
    fs::set_permissions(tf.path(), fs::Permissions::from_mode(mode))?;
    tf.as_file_mut().sync_all()?;
    tf.persist(path)?;
    Ok(())
}

/// Read the whole file at `path`, refusing files larger than `max` bytes.
///
/// Returns `Ok(None)` if the file does not exist.
pub fn slurp_bounded(
    path: impl AsRef<Path>,
    max: u64,
) -> io::Result<Option<Vec<u8>>> {
    let file = match fs::File::open(path) {
        Ok(f) => f,
        Err(e) if io::ErrorKind::NotFound == e.kind() => return Ok(None),
        Err(e) => return Err(e),
    };

    let mut data = Vec::new();
    file.take(max + 1).read_to_end(&mut data)?;
    if data.len() as u64 > max {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "File exceeds size limit",
        ));
    }

    Ok(Some(data))
}

/// Remove the file at `path`, treating a missing file as success.
pub fn remove_if_exists(path: impl AsRef<Path>) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if io::ErrorKind::NotFound == e.kind() => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod test {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn spit_and_slurp() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("foo");

        assert!(slurp_bounded(&path, 10).unwrap().is_none());
        spit(dir.path(), &path, 0o600, b"hello").unwrap();
        spit(dir.path(), &path, 0o600, b"world").unwrap();
        assert_eq!(b"world".to_vec(), slurp_bounded(&path, 5).unwrap().unwrap());
        assert!(slurp_bounded(&path, 4).is_err());

        remove_if_exists(&path).unwrap();
        remove_if_exists(&path).unwrap();
        assert!(!path.exists());
    }
}
