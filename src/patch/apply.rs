// gitmesh - A client-side runtime for decentralized Git collaboration over Nostr
// Copyright (C) 2025 Awiteb <a@4rs.nl>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://gnu.org/licenses/gpl-3.0.html>.

use std::{path::Path, sync::LazyLock};

use regex::Regex;

use super::changes::ChangeType;
use crate::{
    error::{GitMeshError, GitMeshResult},
    ports::{CommitOpts, GitProvider},
};

/// Hunk header: `@@ -<old_start>[,<old_lines>] +<new_start>[,<new_lines>] @@`.
static HUNK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^@@ -(?<os>\d+)(?:,(?<oc>\d+))? \+(?<ns>\d+)(?:,(?<nc>\d+))? @@").unwrap()
});

/// `diff --git a/<old> b/<new>` file header.
static DIFF_GIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^diff --git a/(?<a>.+) b/(?<b>.+)$").unwrap());

/// One line of a hunk body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HunkLine {
    Context(String),
    Add(String),
    Remove(String),
}

/// One hunk. Starts are the 1-based line numbers from the header; they
/// are hints only, application anchors on the pre-image context.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Hunk {
    pub old_start: usize,
    pub new_start: usize,
    pub lines:     Vec<HunkLine>,
}

impl Hunk {
    /// The lines this hunk expects to find (context + removals, in
    /// order).
    fn pre_image(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter_map(|l| {
                match l {
                    HunkLine::Context(s) | HunkLine::Remove(s) => Some(s.as_str()),
                    HunkLine::Add(_) => None,
                }
            })
            .collect()
    }

    /// The lines this hunk leaves behind (context + additions, in
    /// order).
    fn post_image(&self) -> Vec<String> {
        self.lines
            .iter()
            .filter_map(|l| {
                match l {
                    HunkLine::Context(s) | HunkLine::Add(s) => Some(s.clone()),
                    HunkLine::Remove(_) => None,
                }
            })
            .collect()
    }
}

/// One file section of a parsed patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePatch {
    pub path:     String,
    pub old_path: String,
    pub kind:     ChangeType,
    pub hunks:    Vec<Hunk>,
}

/// One applied working-tree operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOperation {
    pub path: String,
    pub kind: ChangeType,
}

/// Result of applying a patch.
#[derive(Debug, Clone, Default)]
pub struct ApplyOutcome {
    /// Absent for empty patches, which are commit-free successes.
    pub commit:     Option<String>,
    pub operations: Vec<FileOperation>,
}

/// Parses the unified-diff section of a patch (any mail header block
/// before the first `diff --git` line is skipped).
pub fn parse_patch(text: &str) -> GitMeshResult<Vec<FilePatch>> {
    let mut files: Vec<FilePatch> = Vec::new();
    let mut lines = text.split('\n').peekable();

    while let Some(line) = lines.next() {
        let Some(header) = DIFF_GIT_RE.captures(line) else {
            continue;
        };
        let old_path = header["a"].to_owned();
        let path = header["b"].to_owned();
        let mut kind = ChangeType::Modify;
        let mut hunks = Vec::new();

        // File-level headers up to the first hunk.
        while let Some(peeked) = lines.peek() {
            if peeked.starts_with("diff --git ") || HUNK_RE.is_match(peeked) {
                break;
            }
            let header_line = lines.next().expect("Just peeked");
            if header_line.starts_with("new file mode") || header_line == "--- /dev/null" {
                kind = ChangeType::Add;
            } else if header_line.starts_with("deleted file mode")
                || header_line == "+++ /dev/null"
            {
                kind = ChangeType::Remove;
            }
        }

        // Hunks. Body length is driven by the header counts, so trailing
        // signature lines never leak in.
        while let Some(peeked) = lines.peek() {
            let Some(captures) = HUNK_RE.captures(peeked) else {
                break;
            };
            let old_count: usize = captures
                .name("oc")
                .map_or(1, |m| m.as_str().parse().unwrap_or(1));
            let new_count: usize = captures
                .name("nc")
                .map_or(1, |m| m.as_str().parse().unwrap_or(1));
            let mut hunk = Hunk {
                old_start: captures["os"].parse().unwrap_or(0),
                new_start: captures["ns"].parse().unwrap_or(0),
                lines: Vec::new(),
            };
            lines.next();

            let (mut old_seen, mut new_seen) = (0usize, 0usize);
            while old_seen < old_count || new_seen < new_count {
                let Some(body_line) = lines.next() else { break };
                if let Some(rest) = body_line.strip_prefix('+') {
                    hunk.lines.push(HunkLine::Add(rest.to_owned()));
                    new_seen += 1;
                } else if let Some(rest) = body_line.strip_prefix('-') {
                    hunk.lines.push(HunkLine::Remove(rest.to_owned()));
                    old_seen += 1;
                } else if let Some(rest) = body_line.strip_prefix(' ') {
                    hunk.lines.push(HunkLine::Context(rest.to_owned()));
                    old_seen += 1;
                    new_seen += 1;
                } else if body_line.starts_with('\\') {
                    // `\ No newline at end of file`
                } else if body_line.is_empty() {
                    hunk.lines.push(HunkLine::Context(String::new()));
                    old_seen += 1;
                    new_seen += 1;
                } else {
                    return Err(GitMeshError::InvalidInput(format!(
                        "Unexpected hunk line `{body_line}`"
                    )));
                }
            }
            hunks.push(hunk);
        }

        files.push(FilePatch {
            path,
            old_path,
            kind,
            hunks,
        });
    }

    Ok(files)
}

/// Applies hunks to file content, anchoring each hunk by its pre-image
/// context rather than the header line numbers. Returns the index of the
/// first hunk that does not anchor.
pub fn apply_hunks(content: &str, hunks: &[Hunk]) -> Result<String, usize> {
    // `split` keeps `\r` inside the line text, so CRLF content survives
    // round-tripping.
    let had_trailing_newline = content.ends_with('\n');
    let mut lines: Vec<String> = content.split('\n').map(ToOwned::to_owned).collect();
    if had_trailing_newline {
        lines.pop();
    }
    if content.is_empty() {
        lines.clear();
    }

    let mut offset: isize = 0;
    for (index, hunk) in hunks.iter().enumerate() {
        let pre = hunk.pre_image();
        let post = hunk.post_image();

        let position = if pre.is_empty() {
            // Pure insertion: fall back to the header position.
            let at = (hunk.old_start as isize + offset).max(0) as usize;
            Some(at.min(lines.len()))
        } else {
            let hint = (hunk.old_start as isize - 1 + offset).max(0) as usize;
            locate(&lines, &pre, hint)
        };
        let Some(position) = position else {
            return Err(index);
        };

        lines.splice(position..position + pre.len(), post.iter().cloned());
        offset += post.len() as isize - pre.len() as isize;
    }

    let mut out = lines.join("\n");
    if had_trailing_newline || (content.is_empty() && !out.is_empty()) {
        out.push('\n');
    }
    Ok(out)
}

/// Finds where the pre-image matches, preferring the match closest to the
/// hint when the context is ambiguous.
fn locate(lines: &[String], pre: &[&str], hint: usize) -> Option<usize> {
    if lines.len() < pre.len() {
        return None;
    }
    let matches_at = |at: usize| lines[at..at + pre.len()].iter().zip(pre).all(|(l, p)| l == p);

    if hint + pre.len() <= lines.len() && matches_at(hint) {
        return Some(hint);
    }
    (0..=lines.len() - pre.len())
        .filter(|at| matches_at(*at))
        .min_by_key(|at| at.abs_diff(hint))
}

/// Applies a multi-file patch to the working tree and commits the result
/// with the supplied author. All file contents are computed before
/// anything is written, so a conflict aborts with the tree untouched. An
/// empty patch is a commit-free success.
pub async fn apply_patch<P: GitProvider>(
    provider: &P,
    dir: &Path,
    patch_text: &str,
    commit_opts: &CommitOpts,
) -> GitMeshResult<ApplyOutcome> {
    if patch_text.trim().is_empty() {
        return Ok(ApplyOutcome::default());
    }

    let files = parse_patch(patch_text)?;
    if files.is_empty() {
        return Ok(ApplyOutcome::default());
    }

    // Phase one: compute every new content in memory.
    let mut writes: Vec<(String, String)> = Vec::new();
    let mut removals: Vec<String> = Vec::new();
    let mut conflicts: Vec<String> = Vec::new();
    for file in &files {
        match file.kind {
            ChangeType::Remove => removals.push(file.old_path.clone()),
            ChangeType::Add => {
                match apply_hunks("", &file.hunks) {
                    Ok(content) => writes.push((file.path.clone(), content)),
                    Err(_) => conflicts.push(file.path.clone()),
                }
            }
            ChangeType::Modify => {
                let current = provider.read_file(dir, &file.old_path).await?;
                let current = String::from_utf8_lossy(&current).into_owned();
                match apply_hunks(&current, &file.hunks) {
                    Ok(content) => writes.push((file.path.clone(), content)),
                    Err(hunk) => {
                        tracing::debug!(
                            path = %file.path,
                            hunk = hunk,
                            "Hunk failed to anchor"
                        );
                        conflicts.push(file.path.clone());
                    }
                }
            }
        }
    }
    if !conflicts.is_empty() {
        return Err(GitMeshError::MergeConflict(conflicts));
    }

    // Phase two: mutate and commit.
    let mut operations = Vec::new();
    for (path, content) in &writes {
        provider.write_file(dir, path, content.as_bytes()).await?;
        provider.add(dir, path).await?;
    }
    for path in &removals {
        provider.remove(dir, path).await?;
        operations.push(FileOperation {
            path: path.clone(),
            kind: ChangeType::Remove,
        });
    }
    for file in &files {
        if file.kind != ChangeType::Remove {
            operations.push(FileOperation {
                path: file.path.clone(),
                kind: file.kind,
            });
        }
    }

    let commit = provider.commit(dir, commit_opts).await?;
    Ok(ApplyOutcome {
        commit: Some(commit),
        operations,
    })
}
