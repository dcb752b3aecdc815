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

//! The patch engine: mergeability analysis, deterministic multi-hunk
//! application, unified diff production, and file-change computation.

/// Context-anchored hunk application.
pub mod apply;
/// Merge analysis against a target branch.
pub mod analyze;
/// Tree-to-tree change sets and diff anchors.
pub mod changes;
/// Unified diff production.
pub mod diff;

use std::{
    path::{Path, PathBuf},
    str::FromStr,
};

use crate::{
    error::{GitMeshError, GitMeshResult},
    events::types::PatchEvent,
    ports::CommitInfo,
};

/// The width of the stem segment in derived patch file names.
const STEM_WIDTH: usize = 60;

/// A patch in git's mail format. The envelope headers are promoted into
/// fields; `inner` keeps the full text for the event payload.
#[derive(Clone, Debug, Default)]
pub struct PatchFile {
    /// Full content of the patch file.
    pub inner:   String,
    /// Short description of the patch changes.
    pub subject: String,
    /// Detailed explanation of the patch changes.
    pub body:    String,
    /// Commit id from the `From <oid>` magic line.
    pub oid:     Option<String>,
    /// `From:` header, as `Name <email>`.
    pub author:  Option<String>,
    /// `Date:` header, RFC 2822.
    pub date:    Option<String>,
}

/// The `[PATCH vN M/T]` prefix of a series subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SeriesTag {
    version: Option<u32>,
    /// Position in the series; 0 is the cover letter.
    number:  u32,
}

impl PatchFile {
    /// Wraps a diff in the mail envelope for one commit: the magic
    /// `From` line, author/date/subject headers, the commit body, and
    /// the `---` separator before the diff.
    pub fn compose(commit: &CommitInfo, diff: &str) -> Self {
        let offset = chrono::FixedOffset::east_opt(commit.committer.tz_minutes * 60)
            .unwrap_or_else(|| chrono::FixedOffset::east_opt(0).expect("UTC is a valid offset"));
        let date = chrono::DateTime::from_timestamp(commit.committer.timestamp, 0)
            .unwrap_or_default()
            .with_timezone(&offset)
            .to_rfc2822();
        let author = format!("{} <{}>", commit.author.name, commit.author.email);

        let mut message_lines = commit.message.lines();
        let summary = message_lines.next().unwrap_or_default();
        let subject = format!("[PATCH] {summary}");
        let body = message_lines
            .skip_while(|l| l.is_empty())
            .collect::<Vec<_>>()
            .join("\n");

        let mut inner = format!(
            "From {} Mon Sep 17 00:00:00 2001\nFrom: {author}\nDate: {date}\nSubject: {subject}\n\n",
            commit.oid,
        );
        if !body.is_empty() {
            inner.push_str(&body);
            inner.push('\n');
        }
        inner.push_str("---\n");
        inner.push_str(diff);

        Self {
            inner,
            subject,
            body,
            oid: Some(commit.oid.clone()),
            author: Some(author),
            date: Some(date),
        }
    }

    /// The patch carried by an inbound patch event, when its content is
    /// mail-formatted. Bare-diff contents return `None`.
    pub fn from_event(event: &PatchEvent) -> Option<Self> {
        event.content.parse().ok()
    }

    /// The unified-diff section of the patch: everything from the first
    /// `diff --git` line on. Empty for cover letters.
    pub fn diff(&self) -> &str {
        if self.inner.starts_with("diff --git ") {
            return &self.inner;
        }
        self.inner
            .find("\ndiff --git ")
            .map(|at| &self.inner[at + 1..])
            .unwrap_or("")
    }

    /// Derives the on-disk file name a series member would carry, e.g.
    /// `v2-0001-feat-some-change.patch`. Position 0 is the cover letter.
    pub fn filename(&self, parent: impl AsRef<Path>) -> GitMeshResult<PathBuf> {
        let series = self.series_tag().ok_or_else(|| {
            GitMeshError::InvalidInput(format!(
                "Can not parse the patch subject `{}`",
                self.subject
            ))
        })?;

        let stem = if series.number == 0 {
            "cover-letter".to_owned()
        } else {
            self.stem()?
        };
        let version = series
            .version
            .map(|v| format!("v{v}-"))
            .unwrap_or_default();

        Ok(parent
            .as_ref()
            .join(format!("{version}{:04}-{stem}", series.number))
            .with_extension("patch"))
    }

    /// Parses the `[PATCH vN M/T]` subject prefix. A bare `[PATCH]` is a
    /// single-patch series at position 1.
    fn series_tag(&self) -> Option<SeriesTag> {
        let rest = self.subject.strip_prefix("[PATCH")?;
        let (tag, _) = rest.split_once(']')?;
        let tag = tag.trim();
        if tag.is_empty() {
            return Some(SeriesTag {
                version: None,
                number:  1,
            });
        }

        let mut words = tag.split_whitespace();
        let mut word = words.next()?;
        let mut version = None;
        if !word.contains('/') {
            version = Some(word.strip_prefix('v')?.parse().ok()?);
            word = words.next()?;
        }
        let (number, total) = word.split_once('/')?;
        if number.is_empty() || total.is_empty() {
            return None;
        }
        total.parse::<u32>().ok()?;
        Some(SeriesTag {
            version,
            number: number.parse().ok()?,
        })
    }

    /// A filesystem-safe stem from the subject text after `[PATCH ...]`:
    /// lowercased, anything unsafe collapsed into single dashes.
    fn stem(&self) -> GitMeshResult<String> {
        let text = self
            .subject
            .split_once(']')
            .ok_or_else(|| {
                GitMeshError::InvalidInput(format!(
                    "Invalid patch subject. No `[PATCH ...]`: `{}`",
                    self.subject
                ))
            })?
            .1;

        let mut stem = String::new();
        for c in text.trim().chars() {
            let c = c.to_ascii_lowercase();
            let c = if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '-'
            };
            if c == '-' && stem.ends_with('-') {
                continue;
            }
            stem.push(c);
            if stem.len() == STEM_WIDTH {
                break;
            }
        }
        Ok(stem.trim_matches('-').to_owned())
    }
}

/// The commit id of a `From <oid> <date>` mail magic line.
fn mail_from_oid(line: &str) -> Option<String> {
    let rest = line.strip_prefix("From ")?;
    let (oid, tail) = rest.split_at_checked(40)?;
    let lowercase_hex = oid
        .chars()
        .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase());
    (lowercase_hex && tail.starts_with(' ') && tail.len() > 1).then(|| oid.to_owned())
}

impl FromStr for PatchFile {
    type Err = String;

    fn from_str(content: &str) -> Result<Self, Self::Err> {
        let mut lines = content.lines();
        let oid = lines
            .next()
            .and_then(mail_from_oid)
            .ok_or("The first line must be a `From <commit-id>` mail line")?;

        // Header block up to the first blank line. `Subject:` may fold
        // over several lines, each continuation indented by one space.
        let mut subject: Option<String> = None;
        let mut author = None;
        let mut date = None;
        let mut folding_subject = false;
        for line in lines.by_ref() {
            if line.is_empty() {
                break;
            }
            if let Some(rest) = line.strip_prefix("Subject: ") {
                subject = Some(rest.to_owned());
                folding_subject = true;
            } else if let Some(rest) = line.strip_prefix("From: ") {
                author = Some(rest.to_owned());
                folding_subject = false;
            } else if let Some(rest) = line.strip_prefix("Date: ") {
                date = Some(rest.to_owned());
                folding_subject = false;
            } else if folding_subject && line.starts_with(' ') {
                if let Some(subject) = &mut subject {
                    subject.push_str(line);
                }
            } else {
                folding_subject = false;
            }
        }
        let subject = subject.ok_or("No subject found")?.trim().to_owned();

        // Body: everything up to the `---` separator, the signature
        // trailer, or the diff itself.
        let mut body_lines = Vec::new();
        for line in lines {
            if line == "---"
                || line == "--"
                || line.starts_with("-- ")
                || line.starts_with("diff --git ")
            {
                break;
            }
            body_lines.push(line);
        }
        let body = body_lines.join("\n").trim().to_owned();
        if body.is_empty() {
            return Err("No body found".to_owned());
        }

        Ok(Self {
            inner: content.to_owned(),
            subject,
            body,
            oid: Some(oid),
            author,
            date,
        })
    }
}
