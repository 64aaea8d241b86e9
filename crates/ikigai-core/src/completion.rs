// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Tab completion over commands and their arguments.
//!
//! Matching is two-stage: a case-insensitive *prefix gate* filters the
//! candidate set, then surviving candidates are ranked with an fzy-style
//! bonus score (consecutive runs, word boundaries).  Ties keep the original
//! candidate order, and the list is capped at 15 entries.

use crate::commands::COMMAND_NAMES;

/// Maximum number of suggestions returned.
const MAX_COMPLETIONS: usize = 15;

const THINKING_LEVELS: &[&str] = &["none", "low", "med", "high"];
const DEBUG_ARGS: &[&str] = &["off", "on"];

// ─── Scoring ──────────────────────────────────────────────────────────────────

/// Score a candidate that already passed the prefix gate.
///
/// Bonuses follow the fzy shape: +1 per matched char, +3 for a consecutive
/// run, +5 for matching at the start, +2 after a word boundary (`/ - _ .` or
/// a lower→upper camel edge).  With a prefix gate all matches are consecutive
/// from position 0, so shorter candidates with boundary-dense prefixes rank
/// first.
pub fn fzy_score(search: &str, candidate: &str) -> f64 {
    let search: Vec<char> = search.to_lowercase().chars().collect();
    let cand: Vec<char> = candidate.chars().collect();
    let cand_lc: Vec<char> = candidate.to_lowercase().chars().collect();

    let mut score = 0.0;
    for (i, sc) in search.iter().enumerate() {
        if i >= cand_lc.len() || cand_lc[i] != *sc {
            break;
        }
        score += 1.0;
        if i == 0 {
            score += 5.0;
        } else {
            score += 3.0; // consecutive run
            let prev = cand[i - 1];
            if matches!(prev, '/' | '-' | '_' | '.' | ' ') {
                score += 2.0;
            } else if prev.is_lowercase() && cand[i].is_uppercase() {
                score += 2.0;
            }
        }
    }
    score
}

/// Prefix-gate then rank `candidates` against `search`.
///
/// The returned list preserves candidate order among equal scores and is
/// truncated to [`MAX_COMPLETIONS`].
pub fn fzy_filter(candidates: &[&str], search: &str) -> Vec<String> {
    // Empty search: everything matches equally; keep candidate order.
    if search.is_empty() {
        return candidates.iter().take(MAX_COMPLETIONS).map(|c| c.to_string()).collect();
    }
    let needle = search.to_lowercase();
    let mut scored: Vec<(usize, f64, &str)> = candidates
        .iter()
        .enumerate()
        .filter(|(_, c)| c.to_lowercase().starts_with(&needle))
        .map(|(i, c)| (i, fzy_score(search, c), *c))
        .collect();
    // Stable sort keeps the original index order for equal scores.
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(MAX_COMPLETIONS);
    scored.into_iter().map(|(_, _, c)| c.to_string()).collect()
}

// ─── Completion state ─────────────────────────────────────────────────────────

/// An active completion: the kept portion of the input line plus the ranked
/// candidate list, with a cycling cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    /// Everything before the token being completed (kept verbatim).
    pub kept: String,
    pub candidates: Vec<String>,
    pub current: usize,
}

impl Completion {
    pub fn current(&self) -> &str {
        &self.candidates[self.current]
    }

    pub fn next(&mut self) {
        self.current = (self.current + 1) % self.candidates.len();
    }

    pub fn prev(&mut self) {
        self.current = if self.current == 0 { self.candidates.len() - 1 } else { self.current - 1 };
    }

    /// The full input line with the current candidate substituted.
    pub fn apply(&self) -> String {
        format!("{}{}", self.kept, self.current())
    }
}

/// Build a completion for `input`, or `None` when nothing completes.
///
/// `mark_labels` feeds the `/rewind` argument provider from the active
/// agent's marks.
pub fn complete(input: &str, mark_labels: &[String]) -> Option<Completion> {
    if !input.starts_with('/') {
        return None;
    }
    match input.find(' ') {
        None => complete_command_name(input),
        Some(space) => complete_argument(input, space, mark_labels),
    }
}

fn complete_command_name(input: &str) -> Option<Completion> {
    let search = &input[1..];
    let candidates = fzy_filter(COMMAND_NAMES, search);
    if candidates.is_empty() {
        return None;
    }
    Some(Completion { kept: "/".to_string(), candidates, current: 0 })
}

fn complete_argument(input: &str, space: usize, mark_labels: &[String]) -> Option<Completion> {
    let command = &input[1..space];
    if command.is_empty() {
        return None;
    }
    let arg_start = space + 1;
    let arg = &input[arg_start..];

    let (kept, candidates): (String, Vec<String>) = match command {
        "model" => match arg.find('/') {
            // `/model NAME/LEV` — complete the thinking level after the slash.
            Some(slash) => {
                let level_prefix = &arg[slash + 1..];
                (
                    input[..arg_start + slash + 1].to_string(),
                    fzy_filter(THINKING_LEVELS, level_prefix),
                )
            }
            None => {
                let models: Vec<&str> = ikigai_model::registry::known_model_ids().collect();
                (input[..arg_start].to_string(), fzy_filter(&models, arg))
            }
        },
        "debug" => (input[..arg_start].to_string(), fzy_filter(DEBUG_ARGS, arg)),
        "rewind" => {
            let labels: Vec<&str> = mark_labels.iter().map(String::as_str).collect();
            (input[..arg_start].to_string(), fzy_filter(&labels, arg))
        }
        // mark, pin, clear, fork… take free-form arguments.
        _ => return None,
    };

    if candidates.is_empty() {
        return None;
    }
    Some(Completion { kept, candidates, current: 0 })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const NO_MARKS: &[String] = &[];

    // ── Filter semantics ──────────────────────────────────────────────────────

    #[test]
    fn prefix_gate_is_case_insensitive() {
        let out = fzy_filter(&["Model", "mode", "quit"], "MO");
        assert_eq!(out, vec!["Model", "mode"]);
    }

    #[test]
    fn non_prefix_matches_are_excluded() {
        // "odel" appears inside "model" but is not a prefix.
        assert!(fzy_filter(&["model"], "odel").is_empty());
    }

    #[test]
    fn output_is_subset_of_candidates() {
        let candidates = ["alpha", "beta", "alphabet"];
        for result in fzy_filter(&candidates, "al") {
            assert!(candidates.contains(&result.as_str()));
        }
    }

    #[test]
    fn empty_search_matches_everything_in_order() {
        let out = fzy_filter(&["b", "a", "c"], "");
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn results_capped_at_fifteen() {
        let many: Vec<String> = (0..40).map(|i| format!("cand{i:02}")).collect();
        let refs: Vec<&str> = many.iter().map(String::as_str).collect();
        assert_eq!(fzy_filter(&refs, "cand").len(), 15);
    }

    #[test]
    fn boundary_bonus_outranks_plain_run() {
        // After matching "model-", the boundary bonus rewards the candidate
        // whose next char follows the separator.
        let out = fzy_filter(&["modelx", "model-x"], "model-x");
        assert_eq!(out[0], "model-x");
    }

    #[test]
    fn equal_scores_keep_candidate_order() {
        let out = fzy_filter(&["markb", "marka"], "mark");
        assert_eq!(out, vec!["markb", "marka"]);
    }

    // ── Command completion ────────────────────────────────────────────────────

    #[test]
    fn completes_command_names() {
        let c = complete("/m", NO_MARKS).unwrap();
        assert!(c.candidates.contains(&"mark".to_string()));
        assert!(c.candidates.contains(&"model".to_string()));
        assert_eq!(c.kept, "/");
    }

    #[test]
    fn bare_slash_offers_all_commands() {
        let c = complete("/", NO_MARKS).unwrap();
        assert_eq!(c.candidates.len(), COMMAND_NAMES.len());
    }

    #[test]
    fn non_command_input_does_not_complete() {
        assert!(complete("hello", NO_MARKS).is_none());
    }

    #[test]
    fn unknown_prefix_yields_none() {
        assert!(complete("/zzz", NO_MARKS).is_none());
    }

    // ── Argument completion ───────────────────────────────────────────────────

    #[test]
    fn model_arguments_come_from_registry() {
        let c = complete("/model gpt-4", NO_MARKS).unwrap();
        assert!(c.candidates.iter().all(|m| m.starts_with("gpt-4")));
        assert!(c.candidates.contains(&"gpt-4o".to_string()));
        assert_eq!(c.apply(), format!("/model {}", c.current()));
    }

    #[test]
    fn model_level_completion_after_slash() {
        let c = complete("/model gpt-5/h", NO_MARKS).unwrap();
        assert_eq!(c.candidates, vec!["high"]);
        assert_eq!(c.apply(), "/model gpt-5/high");
    }

    #[test]
    fn model_level_empty_prefix_lists_all_levels() {
        let c = complete("/model gpt-5/", NO_MARKS).unwrap();
        assert_eq!(c.candidates, vec!["none", "low", "med", "high"]);
    }

    #[test]
    fn debug_arguments() {
        let c = complete("/debug o", NO_MARKS).unwrap();
        assert_eq!(c.candidates, vec!["off", "on"]);
    }

    #[test]
    fn rewind_completes_mark_labels() {
        let marks = vec!["attempt-one".to_string(), "attempt-two".to_string()];
        let c = complete("/rewind attempt", &marks).unwrap();
        assert_eq!(c.candidates.len(), 2);
        let c = complete("/rewind attempt-t", &marks).unwrap();
        assert_eq!(c.candidates, vec!["attempt-two"]);
    }

    #[test]
    fn rewind_with_no_marks_yields_none() {
        assert!(complete("/rewind a", NO_MARKS).is_none());
    }

    #[test]
    fn unknown_command_arguments_yield_none() {
        assert!(complete("/mark somelabel", NO_MARKS).is_none());
        assert!(complete("/pin src/", NO_MARKS).is_none());
    }

    // ── Cycling ───────────────────────────────────────────────────────────────

    #[test]
    fn next_and_prev_wrap_around() {
        let mut c = complete("/debug ", NO_MARKS).unwrap();
        assert_eq!(c.current(), "off");
        c.next();
        assert_eq!(c.current(), "on");
        c.next();
        assert_eq!(c.current(), "off");
        c.prev();
        assert_eq!(c.current(), "on");
    }
}
