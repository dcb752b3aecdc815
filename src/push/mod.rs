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

//! The push router: PR-class refspecs become signed patch events, the
//! rest go through the Git provider, with optional post-push status,
//! mirror and state publication that never fail the push itself.

/// Protocol preference persistence.
pub mod preference;

use std::{collections::HashMap, path::Path, sync::Arc, time::Duration};

use nostr::{
    event::EventId,
    key::PublicKey,
    nips::nip01::Coordinate,
};
use tokio::sync::Mutex;

use self::preference::{MemoryPreferenceStore, ProtocolPreferenceStore};
use crate::{
    discovery::{DiscoverOptions, Discovered, Discovery},
    error::{GitMeshError, GitMeshResult},
    events::{
        build::{self, PatchDraft},
        types::{Head, RepoState, StatusKind},
    },
    key::RepoKey,
    kinds::GitKinds,
    patch::{PatchFile, diff},
    ports::{
        CommitInfo,
        EventIo,
        Fs,
        GitProvider,
        NetOpts,
        PushOpts,
        RefSpec,
    },
    threads,
};

/// Hook composing the patch-event content for one PR-class commit. The
/// default produces a full-file patch against the commit's parent.
#[async_trait::async_trait]
pub trait PatchContentSource: Send + Sync {
    async fn content(&self, dir: &Path, commit: &CommitInfo) -> GitMeshResult<Option<String>>;
}

/// A post-push status request. The criteria for closing on push are the
/// caller's; the router never infers them.
#[derive(Debug, Clone)]
pub struct StatusRequest {
    pub root: EventId,
    /// Defaults to the applied status.
    pub kind: Option<StatusKind>,
}

/// Options for [`PushRouter::push`].
#[derive(Clone, Default)]
pub struct PushOptions {
    pub refspecs:        Vec<String>,
    /// Target branch recorded on emitted patch events; the repository's
    /// default branch when absent.
    pub base_branch:     Option<String>,
    pub status:          Option<StatusRequest>,
    /// Content-addressed mirror endpoint, used when the filesystem
    /// supports it.
    pub mirror_endpoint: Option<String>,
    /// Publish a state event from the local refs after a successful
    /// push.
    pub publish_state:   bool,
    pub patch_content:   Option<Arc<dyn PatchContentSource>>,
    pub net:             NetOpts,
}

/// What a push did.
#[derive(Debug, Clone, Default)]
pub struct PushOutcome {
    /// Patch events published for PR-class refspecs, in refspec order.
    pub patch_events:    Vec<EventId>,
    /// Refspecs forwarded to the Git provider.
    pub pushed_refspecs: Vec<String>,
    /// The URL the provider push went through, when one was pinned.
    pub used_url:        Option<String>,
    /// Failures of the optional post-push steps. Never fatal.
    pub warnings:        Vec<String>,
}

/// Routes `push` between the event layer and the Git transport.
pub struct PushRouter<P, E, F> {
    provider:    P,
    discovery:   Arc<Discovery<E>>,
    fs:          F,
    kinds:       GitKinds,
    preference:  Arc<dyn ProtocolPreferenceStore>,
    /// Serializes state publication per address.
    state_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl<P, E, F> PushRouter<P, E, F>
where
    P: GitProvider,
    E: EventIo,
    F: Fs,
{
    pub fn new(provider: P, discovery: Arc<Discovery<E>>, fs: F) -> Self {
        Self {
            provider,
            discovery,
            fs,
            kinds: GitKinds::default(),
            preference: Arc::new(MemoryPreferenceStore::new()),
            state_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Swaps in a persistent protocol preference store.
    pub fn with_preference(mut self, store: Arc<dyn ProtocolPreferenceStore>) -> Self {
        self.preference = store;
        self
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn discovery(&self) -> &Discovery<E> {
        &self.discovery
    }

    /// Pushes a set of refspecs for a materialized repository.
    /// `refs/heads/pr/*` refspecs become signed patch events; the rest
    /// are forwarded to the provider, retrying one alternate mirror from
    /// discovery on failure.
    pub async fn push(
        &self,
        key: &RepoKey,
        dir: &Path,
        options: &PushOptions,
    ) -> GitMeshResult<PushOutcome> {
        let specs: Vec<RefSpec> = options
            .refspecs
            .iter()
            .map(|s| s.parse())
            .collect::<GitMeshResult<_>>()?;
        let (pr_specs, normal_specs): (Vec<RefSpec>, Vec<RefSpec>) =
            specs.into_iter().partition(RefSpec::is_pr);

        // Discovery feeds recipient enrichment and mirror fallback; a
        // failure here only degrades them.
        let discovered = match self
            .discovery
            .discover_repo(key, &DiscoverOptions::default())
            .await
        {
            Ok(discovered) => discovered,
            Err(err) => {
                tracing::debug!(address = %key.address, error = %err, "Push without discovery");
                Discovered::default()
            }
        };

        let mut outcome = PushOutcome::default();

        let base_branch = match &options.base_branch {
            Some(branch) => branch.clone(),
            None => {
                discovered
                    .state
                    .as_ref()
                    .and_then(RepoState::auto_head)
                    .unwrap_or_else(|| "main".to_owned())
            }
        };

        // Patch events are emitted sequentially so thread reconstruction
        // on the relay side sees them in order.
        for spec in &pr_specs {
            let event_id = self
                .emit_patch_event(key, dir, spec, &base_branch, &discovered, options)
                .await
                .map_err(|err| err.context("push_pr_ref", key.address.clone()))?;
            outcome.patch_events.push(event_id);
        }

        if !normal_specs.is_empty() {
            let used_url = self
                .push_normal_refs(key, dir, &normal_specs, &discovered, options)
                .await?;
            outcome.pushed_refspecs = normal_specs.iter().map(ToString::to_string).collect();
            outcome.used_url = used_url;
        }

        self.post_push(key, dir, options, &discovered, &mut outcome)
            .await;
        Ok(outcome)
    }

    /// Builds and publishes one patch event for a PR-class refspec.
    async fn emit_patch_event(
        &self,
        key: &RepoKey,
        dir: &Path,
        spec: &RefSpec,
        base_branch: &str,
        discovered: &Discovered,
        options: &PushOptions,
    ) -> GitMeshResult<EventId> {
        let oid = self.provider.resolve_ref(dir, &spec.src).await?;
        let commit = self.provider.read_commit(dir, &oid).await?;

        let summary = commit
            .message
            .lines()
            .next()
            .unwrap_or_default()
            .to_owned();
        let custom = match &options.patch_content {
            Some(source) => source.content(dir, &commit).await?,
            None => None,
        };
        let (content, subject) = match custom {
            // Caller-composed content is carried verbatim; its mail
            // headers supply the subject when present.
            Some(raw) => {
                let subject = raw
                    .parse::<PatchFile>()
                    .map(|file| file.subject)
                    .unwrap_or_else(|_| format!("[PATCH] {summary}"));
                (raw, subject)
            }
            None => {
                let file = PatchFile::compose(&commit, &self.commit_diff(dir, &commit).await?);
                (file.inner, file.subject)
            }
        };

        let mut recipients: Vec<PublicKey> = vec![key.parts.pubkey];
        if let Some(announcement) = &discovered.announcement {
            recipients.extend(announcement.maintainers.iter().copied());
        }

        let draft = PatchDraft {
            content,
            subject: Some(subject),
            repo_addrs: vec![
                Coordinate::new(self.kinds.announcement, key.parts.pubkey)
                    .identifier(key.name()),
            ],
            commit: Some(commit.oid.clone()),
            parent_commit: commit.parents.first().cloned(),
            committer: Some(commit.committer.clone()),
            base_branch: Some(base_branch.to_owned()),
            recipients,
            euc: discovered.announcement.as_ref().and_then(|a| a.euc),
            ..Default::default()
        };

        let pubkey = self
            .io()
            .current_pubkey()
            .await?
            .ok_or_else(|| GitMeshError::InvalidInput("A signer is required to push PR refs".to_owned()))?;
        let template = build::patch(&self.kinds, &draft).build(pubkey);
        let event_id = template.id;
        let receipt = self.io().publish_event(template).await?;
        if !receipt.ok {
            return Err(GitMeshError::RelayBusy {
                relay: receipt.error.unwrap_or_else(|| "unknown".to_owned()),
            });
        }
        let event_id = event_id.ok_or_else(|| {
            GitMeshError::Internal("Unsigned template without an id".to_owned())
        })?;
        tracing::info!(event_id = %event_id, refspec = %spec, "Patch event published");
        Ok(event_id)
    }

    /// Full-file diff of the commit against its first parent (the empty
    /// tree for root commits).
    async fn commit_diff(&self, dir: &Path, commit: &CommitInfo) -> GitMeshResult<String> {
        let parent_tree = match commit.parents.first() {
            Some(parent) => Some(self.provider.read_commit(dir, parent).await?.tree),
            None => None,
        };
        diff::multi_file_patch(
            &self.provider,
            dir,
            parent_tree.as_deref(),
            Some(&commit.tree),
        )
        .await
    }

    /// Provider push with protocol preference and one alternate mirror
    /// from discovery on failure.
    async fn push_normal_refs(
        &self,
        key: &RepoKey,
        dir: &Path,
        specs: &[RefSpec],
        discovered: &Discovered,
        options: &PushOptions,
    ) -> GitMeshResult<Option<String>> {
        let preferred = self.preference.get(&key.address).await;
        let push_opts = PushOpts {
            url:      preferred.clone(),
            refspecs: specs.to_vec(),
            net:      options.net.clone(),
        };

        match self.provider.push(dir, &push_opts).await {
            Ok(()) => {
                if let Some(url) = &preferred {
                    self.preference.set(&key.address, url).await;
                }
                Ok(preferred)
            }
            Err(err) => {
                let Some(alternate) = discovered
                    .urls
                    .iter()
                    .find(|u| Some(u.as_str()) != preferred.as_deref())
                else {
                    return Err(err);
                };
                tracing::warn!(
                    error = %err,
                    alternate = %alternate,
                    "Push failed, retrying through alternate URL"
                );
                self.provider
                    .push(
                        dir,
                        &PushOpts {
                            url: Some(alternate.clone()),
                            refspecs: specs.to_vec(),
                            net: options.net.clone(),
                        },
                    )
                    .await?;
                self.preference.set(&key.address, alternate).await;
                Ok(Some(alternate.clone()))
            }
        }
    }

    /// The optional post-push steps. Their failures are collected as
    /// warnings, never surfaced as errors.
    async fn post_push(
        &self,
        key: &RepoKey,
        dir: &Path,
        options: &PushOptions,
        discovered: &Discovered,
        outcome: &mut PushOutcome,
    ) {
        if let Some(request) = &options.status
            && let Err(err) = self.publish_status(key, request, discovered).await
        {
            outcome.warnings.push(format!("status: {err}"));
        }

        if let Some(endpoint) = &options.mirror_endpoint {
            match self.fs.blossom() {
                Some(mirror) => {
                    if let Err(err) = mirror.push_to_blossom(dir, endpoint, None).await {
                        outcome.warnings.push(format!("mirror: {err}"));
                    }
                }
                None => {
                    outcome
                        .warnings
                        .push("mirror: filesystem has no blossom support".to_owned());
                }
            }
        }

        if options.publish_state
            && let Err(err) = self.publish_state(key, dir).await
        {
            outcome.warnings.push(format!("state: {err}"));
        }
    }

    async fn publish_status(
        &self,
        key: &RepoKey,
        request: &StatusRequest,
        discovered: &Discovered,
    ) -> GitMeshResult<()> {
        let new_status = request.kind.unwrap_or(StatusKind::Applied);

        // Only the owner and maintainers speak for a thread's lifecycle;
        // the newest of their status events is the state being changed.
        let mut authorities = vec![key.parts.pubkey];
        if let Some(announcement) = &discovered.announcement {
            authorities.extend(announcement.maintainers.iter().copied());
        }
        let current = threads::current_status(
            self.io(),
            &self.kinds,
            request.root,
            &authorities,
            threads::PARTICIPANT_WINDOW,
        )
        .await;
        current.check_transition(new_status)?;

        let mut recipients = threads::collect_participants(
            self.io(),
            &self.kinds,
            &key.address,
            request.root,
            threads::PARTICIPANT_WINDOW,
        )
        .await;
        recipients.insert(key.parts.pubkey);
        recipients.extend(authorities.iter().copied());

        let pubkey = self
            .io()
            .current_pubkey()
            .await?
            .ok_or_else(|| GitMeshError::InvalidInput("A signer is required".to_owned()))?;
        let template = build::status(
            &self.kinds,
            new_status,
            request.root,
            None,
            &[Coordinate::new(self.kinds.announcement, key.parts.pubkey).identifier(key.name())],
            &recipients.into_iter().collect::<Vec<_>>(),
            None,
        )
        .build(pubkey);
        self.io().publish_event(template).await?;
        Ok(())
    }

    /// Publishes a state event from the local refs. Serialized per
    /// address so two pushes never interleave their state events.
    async fn publish_state(&self, key: &RepoKey, dir: &Path) -> GitMeshResult<()> {
        let lock = self
            .state_locks
            .lock()
            .await
            .entry(key.address.clone())
            .or_default()
            .clone();
        let _guard = lock.lock().await;

        let refs = self.provider.list_refs(dir).await?;
        let mut state = RepoState {
            id: key.name().to_owned(),
            ..Default::default()
        };
        for (name, oid) in refs {
            if name == "HEAD" {
                continue;
            }
            if name.starts_with("refs/heads/") || name.starts_with("refs/tags/") {
                state.refs.insert(name, oid);
            }
        }
        if state.head.is_none()
            && let Some(branch) = state.auto_head()
        {
            state.head = Some(Head::Symbolic(branch));
        }

        let pubkey = self
            .io()
            .current_pubkey()
            .await?
            .ok_or_else(|| GitMeshError::InvalidInput("A signer is required".to_owned()))?;
        let template = build::state(&self.kinds, &state).build(pubkey);
        self.io().publish_event(template).await?;
        Ok(())
    }

    fn io(&self) -> &E {
        self.discovery.io()
    }
}

/// Bounded wait applied to participant enrichment, re-exported for
/// embedders tuning it.
pub const PARTICIPANT_WINDOW: Duration = threads::PARTICIPANT_WINDOW;
