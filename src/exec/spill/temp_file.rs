// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//! Temporary spill file removed on drop.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::blocksort_logging::warn;

static NEXT_FILE_ID: AtomicU64 = AtomicU64::new(0);

/// A spill file under the operator's temporary directory. The file exists
/// (empty) after creation and is removed when the guard drops, covering
/// abandoned partial spills as well as completed runs.
#[derive(Debug)]
pub struct TempSpillFile {
    path: PathBuf,
}

impl TempSpillFile {
    pub fn create(dir: &Path) -> Result<Self, String> {
        let pid = std::process::id();
        let mut attempts = 0;
        loop {
            let id = NEXT_FILE_ID.fetch_add(1, Ordering::AcqRel);
            let path = dir.join(format!("sort_spill_{pid:x}_{id:x}.run"));
            match OpenOptions::new().create_new(true).write(true).open(&path) {
                Ok(_) => return Ok(Self { path }),
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists && attempts < 3 => {
                    attempts += 1;
                }
                Err(err) => {
                    return Err(format!("create spill file {} failed: {err}", path.display()));
                }
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempSpillFile {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path)
            && err.kind() != std::io::ErrorKind::NotFound
        {
            warn!(
                "remove spill file failed: path={} error={}",
                self.path.display(),
                err
            );
        }
    }
}
