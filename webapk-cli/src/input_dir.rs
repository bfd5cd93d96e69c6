// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{fs, path::Path};
use tracing::warn;
use webapk_common::Result;
use webapk_zip::File;

/// Reads every regular file below `root` into an entry named by its path
/// relative to `root`, using forward slashes. Entries are sorted by name so
/// the same directory always packs to the same container.
pub fn read_input_dir(root: &Path) -> Result<Vec<File>> {
    let mut files = vec![];
    collect_files(root, "", &mut files)?;
    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

fn collect_files(dir: &Path, prefix: &str, files: &mut Vec<File>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            warn!(path = ?entry.path(), "ignoring file with a non UTF-8 name");
            continue;
        };
        let path = format!("{prefix}{name}");

        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            collect_files(&entry.path(), &format!("{path}/"), files)?;
        } else if file_type.is_file() {
            files.push(File {
                path,
                data: fs::read(entry.path())?
            });
        } else {
            warn!(path = ?entry.path(), "ignoring entry that isn't a regular file");
        }
    }
    Ok(())
}
