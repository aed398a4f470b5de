//! Resolution strategies for detected conflict regions.
//!
//! Strategies are pluggable and selected by name: `auto` resolves by
//! heuristic, `user` surfaces each region for manual adjudication and blocks
//! until decided, and `agent` delegates each region to a generation
//! collaborator (one request per region). Every strategy returns one
//! [`Resolution`] per region, aligned index-for-index with the input;
//! merging the replacements into a buffer is the caller's concern
//! ([`apply_resolutions`] does so for the CLI).

use anyhow::{Context, Result, bail};

use crate::core::conflict::ConflictRegion;
use crate::core::extract::extract_artifacts;
use crate::io::generator::Generator;

/// Named resolution strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Auto,
    User,
    Agent,
}

impl Strategy {
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "auto" => Ok(Strategy::Auto),
            "user" => Ok(Strategy::User),
            "agent" => Ok(Strategy::Agent),
            other => bail!("unknown resolution strategy '{other}' (expected auto, user or agent)"),
        }
    }
}

/// Resolved replacement for one conflict region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub lines: Vec<String>,
}

/// Adjudicator for the `user` strategy. The CLI implements this over stdin;
/// tests use a scripted implementation.
pub trait ConflictAdjudicator {
    /// Present a region and block until the caller decides on replacement
    /// lines.
    fn adjudicate(&mut self, region: &ConflictRegion) -> Result<Resolution>;
}

/// Heuristic resolution: prefer the longer insertion, ours winning ties.
///
/// The longer side is measured in total bytes across its inserted lines;
/// line count breaks byte ties before falling back to ours.
pub fn resolve_auto(regions: &[ConflictRegion]) -> Vec<Resolution> {
    regions
        .iter()
        .map(|region| {
            let ours_len: usize = region.ours.iter().map(String::len).sum();
            let theirs_len: usize = region.theirs.iter().map(String::len).sum();
            let prefer_theirs = (theirs_len, region.theirs.len()) > (ours_len, region.ours.len());
            Resolution {
                lines: if prefer_theirs {
                    region.theirs.clone()
                } else {
                    region.ours.clone()
                },
            }
        })
        .collect()
}

/// Manual resolution: each region is surfaced through the adjudicator in
/// order, blocking on every decision.
pub fn resolve_user<A: ConflictAdjudicator>(
    regions: &[ConflictRegion],
    adjudicator: &mut A,
) -> Result<Vec<Resolution>> {
    regions.iter().map(|r| adjudicator.adjudicate(r)).collect()
}

/// Delegated resolution: one collaborator request per region. Collaborator
/// errors are fatal, matching the run-level contract.
pub fn resolve_agent<G: Generator>(
    regions: &[ConflictRegion],
    generator: &G,
) -> Result<Vec<Resolution>> {
    regions
        .iter()
        .map(|region| {
            let prompt = region_prompt(region);
            let response = generator
                .respond(&prompt)
                .context("conflict-resolution collaborator failed")?;
            Ok(Resolution {
                lines: replacement_from_response(&response),
            })
        })
        .collect()
}

/// Merge resolutions back into the ancestor text.
///
/// Regions must be the exact list produced by detection (sorted, disjoint)
/// and `resolutions` aligned to them.
pub fn apply_resolutions(
    ancestor: &str,
    regions: &[ConflictRegion],
    resolutions: &[Resolution],
) -> Result<String> {
    if regions.len() != resolutions.len() {
        bail!(
            "resolution count {} does not match region count {}",
            resolutions.len(),
            regions.len()
        );
    }

    let lines: Vec<&str> = ancestor.lines().collect();
    let mut merged: Vec<String> = Vec::with_capacity(lines.len());
    let mut cursor = 0usize;
    for (region, resolution) in regions.iter().zip(resolutions) {
        if region.start < cursor || region.end > lines.len() {
            bail!("region {}..{} is out of bounds", region.start, region.end);
        }
        merged.extend(lines[cursor..region.start].iter().map(|s| s.to_string()));
        merged.extend(resolution.lines.iter().cloned());
        cursor = region.end;
    }
    merged.extend(lines[cursor..].iter().map(|s| s.to_string()));

    let mut out = merged.join("\n");
    if ancestor.ends_with('\n') {
        out.push('\n');
    }
    Ok(out)
}

fn region_prompt(region: &ConflictRegion) -> String {
    format!(
        "Two concurrent revisions of the same file inserted different content \
at lines {}..{}. Choose or synthesize the best replacement, preserving the \
intent of both sides. Reply with a single fenced python block containing only \
the replacement lines.\n\nFirst revision:\n{}\n\nSecond revision:\n{}\n",
        region.start,
        region.end,
        region.ours.join("\n"),
        region.theirs.join("\n"),
    )
}

/// Pull the replacement out of a collaborator response: the first fenced
/// python block when present, otherwise the raw response lines.
fn replacement_from_response(response: &str) -> Vec<String> {
    let extracted = extract_artifacts(response);
    let block = extracted
        .code
        .first()
        .map(|a| a.source.as_str())
        .or_else(|| extracted.tests.first().map(|a| a.source.as_str()));
    match block {
        Some(source) => source.lines().map(str::to_string).collect(),
        None => response.trim().lines().map(str::to_string).collect(),
    }
}
