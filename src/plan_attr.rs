//! Plan attribute override parser (component E).
//!
//! Grammar (`spec.md` §4.E):
//! `(I:<id> ( S:<score> | R:<lo>[-<hi>] | G:<lo>[-<hi>] )* )+`
//!
//! The grammar is four token kinds with no nesting, so a direct
//! hand-written scanner is used rather than reaching for a parser
//! combinator crate -- there is nothing here a combinator library
//! would make clearer.

use crate::error::{UcgError, UcgResult};

/// One `I:<id>` block's overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrOverride {
    pub id: String,
    pub score: Option<i32>,
    pub range: Option<(u64, Option<u64>)>,
    pub group_size: Option<(u64, Option<u64>)>,
}

/// Parse a full attribute-override string into one entry per `I:` block.
pub fn parse(input: &str) -> UcgResult<Vec<AttrOverride>> {
    let mut out = Vec::new();
    let mut tokens = input.split_whitespace().peekable();

    while let Some(tok) = tokens.next() {
        let id = tok.strip_prefix("I:").ok_or(UcgError::InvalidParam)?;
        if id.is_empty() {
            return Err(UcgError::InvalidParam);
        }
        let mut entry = AttrOverride { id: id.to_string(), score: None, range: None, group_size: None };

        while let Some(&next) = tokens.peek() {
            if next.starts_with("I:") {
                break;
            }
            let next = tokens.next().unwrap();
            if let Some(rest) = next.strip_prefix("S:") {
                entry.score = Some(rest.parse::<i32>().map_err(|_| UcgError::InvalidParam)?);
            } else if let Some(rest) = next.strip_prefix("R:") {
                entry.range = Some(parse_bound(rest)?);
            } else if let Some(rest) = next.strip_prefix("G:") {
                entry.group_size = Some(parse_bound(rest)?);
            } else {
                return Err(UcgError::InvalidParam);
            }
        }
        out.push(entry);
    }
    Ok(out)
}

/// Parse `<lo>` or `<lo>-<hi>`. `R:<lo>` with no upper bound means
/// unlimited; `R:<lo>-<lo>` is invalid (`spec.md` §4.E).
fn parse_bound(rest: &str) -> UcgResult<(u64, Option<u64>)> {
    match rest.split_once('-') {
        None => {
            let lo = rest.parse::<u64>().map_err(|_| UcgError::InvalidParam)?;
            Ok((lo, None))
        }
        Some((lo_s, hi_s)) => {
            let lo = lo_s.parse::<u64>().map_err(|_| UcgError::InvalidParam)?;
            let hi = hi_s.parse::<u64>().map_err(|_| UcgError::InvalidParam)?;
            if hi == lo {
                return Err(UcgError::InvalidParam);
            }
            Ok((lo, Some(hi)))
        }
    }
}

/// Apply a parsed override list to a single plan whose stable id
/// (`plan.id`) matches an `I:` entry: override score/range, and mark
/// the plan `deprecated` if `group_size` falls outside a `G:` bound.
pub fn apply(plan: &mut crate::plan::Plan, overrides: &[AttrOverride], current_group_size: u64) {
    for entry in overrides {
        if entry.id != plan.id {
            continue;
        }
        if let Some(score) = entry.score {
            plan.score = score;
        }
        if let Some((lo, hi)) = entry.range {
            plan.range = crate::plan::PlanRange::new(lo, hi.unwrap_or(crate::plan::PLAN_RANGE_MAX));
        }
        if let Some((lo, hi)) = entry.group_size {
            let in_bounds = current_group_size >= lo && hi.map_or(true, |hi| current_group_size <= hi);
            if !in_bounds {
                plan.deprecated = true;
            }
        }
    }
}

/// Apply an override string to every plan -- first-class and fallback
/// alike -- across a whole catalog (`spec.md` §4.H step 4: "For each
/// added plan, apply the user's plan-attribute override string").
pub fn apply_to_list(list: &mut crate::plan::PlanList, overrides: &[AttrOverride], current_group_size: u64) {
    for entry in list.entries_mut() {
        apply(&mut entry.plan, overrides, current_group_size);
        for fb in &mut entry.fallbacks {
            apply(fb, overrides, current_group_size);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_score_and_range() {
        let parsed = parse("I:1 S:10 R:0-4096").unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].id, "1");
        assert_eq!(parsed[0].score, Some(10));
        assert_eq!(parsed[0].range, Some((0, Some(4096))));
    }

    #[test]
    fn id_prefix_matching_does_not_confuse_multi_digit_ids() {
        let parsed = parse("I:1 S:1 I:12 S:2").unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].id, "1");
        assert_eq!(parsed[1].id, "12");
    }

    #[test]
    fn unbounded_range_has_no_upper() {
        let parsed = parse("I:1 R:1000").unwrap();
        assert_eq!(parsed[0].range, Some((1000, None)));
    }

    #[test]
    fn equal_bounds_are_invalid() {
        assert_eq!(parse("I:1 R:10-10").unwrap_err(), UcgError::InvalidParam);
    }

    #[test]
    fn malformed_token_is_invalid_param() {
        assert_eq!(parse("I:1 X:5").unwrap_err(), UcgError::InvalidParam);
        assert_eq!(parse("garbage").unwrap_err(), UcgError::InvalidParam);
    }

    #[test]
    fn group_size_override_deprecates_plan() {
        use crate::plan::{Plan, PlanRange};
        use std::sync::Arc;

        struct Stub;
        impl crate::plan::PrepareFn for Stub {
            fn prepare(
                &self,
                _: &crate::topology::Vgroup,
                _: &Arc<dyn crate::p2p::Transport>,
                _: &crate::plan::CollArgs,
            ) -> UcgResult<Box<dyn crate::plan::PlanOp>> {
                Err(UcgError::Unsupported)
            }
        }

        let overrides = parse("I:1 G:100-200").unwrap();
        let mut plan = Plan::new("1", "d", 10, PlanRange::new(1000, 2000), Arc::new(Stub));
        apply(&mut plan, &overrides, 10);
        assert!(plan.deprecated);
    }
}
