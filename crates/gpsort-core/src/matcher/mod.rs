//! Sidecar matching: an ordered chain of independent rules over a read-only
//! [`DescriptorStore`], plus the per-folder consumption bookkeeping.
//!
//! Each rule only proposes candidates. The chain filters them against what
//! is already consumed, stops at the first unique hit, and keeps the first
//! multi-candidate result pending so a later rule (or the final title
//! check) can narrow it. Anything still pending at the end is reported as
//! ambiguous, never picked arbitrarily.

pub mod rules;

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::media::{MediaFile, MediaName};
use crate::store::{DescriptorId, DescriptorStore};

pub use rules::priority;

/// Whether one image sidecar may serve several live-photo videos.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompanionPolicy {
    #[default]
    Shared,
    OneToOne,
}

impl std::str::FromStr for CompanionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shared" => Ok(Self::Shared),
            "one-to-one" => Ok(Self::OneToOne),
            other => Err(format!("unknown companion policy: {other} (expected shared or one-to-one)")),
        }
    }
}

/// Default sidecar name budget of the export, `.json` included.
pub const DEFAULT_TRUNCATION_LIMIT: usize = 51;

fn default_truncation_limit() -> usize {
    DEFAULT_TRUNCATION_LIMIT
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchConfig {
    #[serde(default = "default_truncation_limit")]
    pub truncation_limit: usize,
    #[serde(default)]
    pub companion_policy: CompanionPolicy,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            truncation_limit: DEFAULT_TRUNCATION_LIMIT,
            companion_policy: CompanionPolicy::default(),
        }
    }
}

/// How a rule's hit consumes the descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// One media file per descriptor
    Exclusive,
    /// Edited copy of a file; may reuse its original's descriptor
    Derivative,
    /// Live-photo video; may reuse its still's descriptor, subject to
    /// [`CompanionPolicy`]
    Companion,
}

/// A single matching rule. Implementations must be pure: same name and
/// store in, same candidates out.
pub trait MatchRule: Send + Sync {
    fn name(&self) -> &'static str;

    fn claim(&self) -> Claim {
        Claim::Exclusive
    }

    /// Candidate sidecars for `media`, in store order, before consumption
    /// filtering.
    fn candidates(&self, media: &MediaName, store: &DescriptorStore, config: &MatchConfig) -> Vec<DescriptorId>;
}

struct RuleEntry {
    priority: u16,
    rule: Box<dyn MatchRule>,
}

/// Rules ordered by ascending priority value; earlier wins.
pub struct RuleChain {
    entries: Vec<RuleEntry>,
}

impl Default for RuleChain {
    fn default() -> Self {
        Self::standard()
    }
}

impl RuleChain {
    pub fn empty() -> Self {
        Self { entries: Vec::new() }
    }

    /// Rules 1-8 at their standard priorities.
    pub fn standard() -> Self {
        let mut chain = Self::empty();
        chain.insert(priority::DIRECT, rules::Direct);
        chain.insert(priority::TRUNCATED, rules::Truncated);
        chain.insert(priority::PARENTHETICAL, rules::Parenthetical);
        chain.insert(priority::EDITED, rules::Edited);
        chain.insert(priority::LIVE_COMPANION, rules::LiveCompanion);
        chain.insert(priority::LIVE_DUPLICATE, rules::LiveDuplicate);
        chain.insert(priority::TITLE, rules::Title);
        chain.insert(priority::BASE_FALLBACK, rules::BaseFallback);
        chain
    }

    /// Insert a rule at a declared priority. Among equal priorities the
    /// rule inserted first runs first.
    pub fn insert(&mut self, priority: u16, rule: impl MatchRule + 'static) {
        let pos = self.entries.partition_point(|e| e.priority <= priority);
        self.entries.insert(
            pos,
            RuleEntry {
                priority,
                rule: Box::new(rule),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|e| e.rule.name()).collect()
    }

    /// Match one media file against the store, honoring what is consumed.
    pub fn match_media(&self, media: &MediaFile, ctx: &MatchContext) -> MatchOutcome {
        let mut attempt = Attempt::default();
        for entry in &self.entries {
            if let Some(outcome) = attempt.step(entry, media, ctx) {
                return outcome;
            }
        }
        attempt.finish(media, ctx)
    }
}

struct Pending {
    rule: &'static str,
    claim: Claim,
    candidates: Vec<DescriptorId>,
}

/// One media file's walk down the chain, one rule at a time.
#[derive(Default)]
struct Attempt {
    pending: Option<Pending>,
    tried: Vec<&'static str>,
}

impl Attempt {
    /// Apply one rule. A unique hit ends the walk; several hits narrow (or
    /// open) the pending ambiguity.
    fn step(&mut self, entry: &RuleEntry, media: &MediaFile, ctx: &MatchContext) -> Option<MatchOutcome> {
        let rule = &entry.rule;
        self.tried.push(rule.name());
        let claim = rule.claim();
        let mut available: Vec<DescriptorId> = Vec::new();
        for id in rule.candidates(&media.name, ctx.store, &ctx.config) {
            if ctx.consumed.is_available(id, claim, ctx.config.companion_policy) && !available.contains(&id) {
                available.push(id);
            }
        }

        let narrowed: Vec<DescriptorId> = match &self.pending {
            Some(p) => available.into_iter().filter(|id| p.candidates.contains(id)).collect(),
            None => available,
        };

        match narrowed.len() {
            0 => tracing::debug!("{}: no candidate for {}", rule.name(), media.filename()),
            1 => {
                return Some(MatchOutcome::Matched {
                    descriptor: narrowed[0],
                    rule: rule.name(),
                    claim,
                })
            }
            _ => {
                if let Some(p) = self.pending.as_mut() {
                    p.candidates = narrowed;
                } else {
                    self.pending = Some(Pending {
                        rule: rule.name(),
                        claim,
                        candidates: narrowed,
                    });
                }
            }
        }
        None
    }

    /// Closing title check on whatever is still pending and unclaimed.
    fn finish(self, media: &MediaFile, ctx: &MatchContext) -> MatchOutcome {
        let Some(p) = self.pending else {
            return MatchOutcome::Unmatched { tried: self.tried };
        };
        let open: Vec<DescriptorId> = p
            .candidates
            .into_iter()
            .filter(|&id| ctx.consumed.is_available(id, p.claim, ctx.config.companion_policy))
            .collect();
        let titled: Vec<DescriptorId> = open
            .iter()
            .copied()
            .filter(|&id| rules::title_matches(ctx.store, id, media.filename()))
            .collect();
        if titled.len() == 1 {
            MatchOutcome::Matched {
                descriptor: titled[0],
                rule: rules::TITLE_NAME,
                claim: p.claim,
            }
        } else if open.is_empty() {
            MatchOutcome::Unmatched { tried: self.tried }
        } else {
            MatchOutcome::Ambiguous {
                rule: p.rule,
                candidates: open,
            }
        }
    }
}

/// Read-only view a rule chain runs against.
pub struct MatchContext<'a> {
    pub store: &'a DescriptorStore,
    pub consumed: &'a ConsumptionSet,
    pub config: MatchConfig,
}

/// Result of matching one media file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    Matched {
        descriptor: DescriptorId,
        rule: &'static str,
        claim: Claim,
    },
    Unmatched {
        tried: Vec<&'static str>,
    },
    Ambiguous {
        rule: &'static str,
        candidates: Vec<DescriptorId>,
    },
}

impl MatchOutcome {
    pub fn descriptor(&self) -> Option<DescriptorId> {
        match self {
            MatchOutcome::Matched { descriptor, .. } => Some(*descriptor),
            _ => None,
        }
    }
}

/// Which descriptors of one folder have been claimed, and by whom.
/// Passed into and returned from [`match_folder`]; never shared across
/// folders.
#[derive(Debug, Clone, Default)]
pub struct ConsumptionSet {
    exclusive: HashMap<DescriptorId, PathBuf>,
    derivatives: HashMap<DescriptorId, Vec<PathBuf>>,
    companions: HashMap<DescriptorId, Vec<PathBuf>>,
}

impl ConsumptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_available(&self, id: DescriptorId, claim: Claim, policy: CompanionPolicy) -> bool {
        match claim {
            Claim::Exclusive => !self.exclusive.contains_key(&id),
            Claim::Derivative => true,
            Claim::Companion => match policy {
                CompanionPolicy::Shared => true,
                CompanionPolicy::OneToOne => !self.companions.contains_key(&id),
            },
        }
    }

    pub fn record(&mut self, id: DescriptorId, claim: Claim, media: &Path) {
        match claim {
            Claim::Exclusive => {
                self.exclusive.insert(id, media.to_path_buf());
            }
            Claim::Derivative => self.derivatives.entry(id).or_default().push(media.to_path_buf()),
            Claim::Companion => self.companions.entry(id).or_default().push(media.to_path_buf()),
        }
    }

    /// Consumed by any successful match.
    pub fn is_consumed(&self, id: DescriptorId) -> bool {
        self.exclusive.contains_key(&id) || self.derivatives.contains_key(&id) || self.companions.contains_key(&id)
    }

    pub fn owner(&self, id: DescriptorId) -> Option<&Path> {
        self.exclusive.get(&id).map(PathBuf::as_path)
    }

    pub fn companions_of(&self, id: DescriptorId) -> &[PathBuf] {
        self.companions.get(&id).map_or(&[], Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        let mut ids: Vec<&DescriptorId> = self
            .exclusive
            .keys()
            .chain(self.derivatives.keys())
            .chain(self.companions.keys())
            .collect();
        ids.sort();
        ids.dedup();
        ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exclusive.is_empty() && self.derivatives.is_empty() && self.companions.is_empty()
    }
}

/// Outcome of matching every media file of a folder.
#[derive(Debug)]
pub struct FolderMatch {
    /// One outcome per media file, same order as the input slice
    pub outcomes: Vec<MatchOutcome>,
    pub consumed: ConsumptionSet,
    /// Successful matches per rule name
    pub rule_hits: BTreeMap<&'static str, u64>,
}

/// Match every media file of a folder.
///
/// Each rule runs as its own round over every file still unmatched before
/// the next rule starts, so a weak rule on one file can never take a
/// sidecar a stronger rule would give another file. Within a round files go
/// in path order; the input order never changes the result. Pending
/// ambiguities get their closing title check once all rounds are done.
pub fn match_folder(
    chain: &RuleChain,
    media: &[MediaFile],
    store: &DescriptorStore,
    config: MatchConfig,
    mut consumed: ConsumptionSet,
) -> FolderMatch {
    let mut order: Vec<usize> = (0..media.len()).collect();
    order.sort_by(|&a, &b| media[a].path.cmp(&media[b].path));

    let mut attempts: Vec<Attempt> = media.iter().map(|_| Attempt::default()).collect();
    let mut outcomes: Vec<Option<MatchOutcome>> = vec![None; media.len()];
    let mut rule_hits: BTreeMap<&'static str, u64> = BTreeMap::new();

    for entry in &chain.entries {
        for &i in &order {
            if outcomes[i].is_some() {
                continue;
            }
            let ctx = MatchContext {
                store,
                consumed: &consumed,
                config,
            };
            if let Some(outcome) = attempts[i].step(entry, &media[i], &ctx) {
                settle(&outcome, &media[i], store, &mut consumed, &mut rule_hits);
                outcomes[i] = Some(outcome);
            }
        }
    }

    for &i in &order {
        if outcomes[i].is_some() {
            continue;
        }
        let attempt = std::mem::take(&mut attempts[i]);
        let ctx = MatchContext {
            store,
            consumed: &consumed,
            config,
        };
        let outcome = attempt.finish(&media[i], &ctx);
        settle(&outcome, &media[i], store, &mut consumed, &mut rule_hits);
        outcomes[i] = Some(outcome);
    }

    FolderMatch {
        outcomes: outcomes
            .into_iter()
            .map(|o| o.unwrap_or(MatchOutcome::Unmatched { tried: Vec::new() }))
            .collect(),
        consumed,
        rule_hits,
    }
}

fn settle(
    outcome: &MatchOutcome,
    media: &MediaFile,
    store: &DescriptorStore,
    consumed: &mut ConsumptionSet,
    rule_hits: &mut BTreeMap<&'static str, u64>,
) {
    if let MatchOutcome::Matched { descriptor, rule, claim } = outcome {
        consumed.record(*descriptor, *claim, &media.path);
        *rule_hits.entry(*rule).or_insert(0) += 1;
        tracing::info!(
            "JSON match - {}: {} → {}",
            rule,
            media.filename(),
            store.get(*descriptor).file_name()
        );
    }
}
