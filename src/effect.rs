//! Reduction of per-rule verdicts into a single decision.
//!
//! The merger is a streaming reducer: verdicts are pushed one at a time and
//! the stream reports as soon as the decision is final, so the evaluation
//! loop can stop iterating rules. Priority operators depend on rule order;
//! the model pre-sorts rules before evaluation.

use crate::errors::{PortcullisError, Result};

/// The closed set of effect operators, parsed from the literal expressions
/// a model's `[policy_effect]` section may contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectKind {
    /// `some(where (p_eft == allow))`
    SomeAllow,
    /// `!some(where (p_eft == deny))`
    NoDeny,
    /// `some(where (p_eft == allow)) && !some(where (p_eft == deny))`
    AllowAndNotDeny,
    /// `priority(p_eft) || deny`
    Priority,
    /// `subjectPriority(p_eft) || deny`
    SubjectPriority,
}

impl EffectKind {
    pub fn parse(expr: &str) -> Result<Self> {
        match expr {
            "some(where (p_eft == allow))" => Ok(EffectKind::SomeAllow),
            "!some(where (p_eft == deny))" => Ok(EffectKind::NoDeny),
            "some(where (p_eft == allow)) && !some(where (p_eft == deny))" => {
                Ok(EffectKind::AllowAndNotDeny)
            }
            "priority(p_eft) || deny" => Ok(EffectKind::Priority),
            "subjectPriority(p_eft) || deny" => Ok(EffectKind::SubjectPriority),
            other => Err(PortcullisError::UnsupportedEffect(other.to_string())),
        }
    }

    /// Priority operators must short-circuit on the first decisive verdict.
    pub fn is_priority(&self) -> bool {
        matches!(self, EffectKind::Priority | EffectKind::SubjectPriority)
    }
}

/// What one rule contributed to the decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Deny,
    /// The matcher did not hold for the rule, or `p_eft` was neither
    /// `allow` nor `deny`.
    Indeterminate,
}

/// Streaming verdict reducer for one `enforce` call.
#[derive(Debug)]
pub struct EffectStream {
    kind: EffectKind,
    decided: Option<bool>,
    explain: Option<usize>,
    saw_allow: Option<usize>,
}

impl EffectStream {
    pub fn new(kind: EffectKind) -> Self {
        Self {
            kind,
            decided: None,
            explain: None,
            saw_allow: None,
        }
    }

    /// Feed the verdict for rule `index` with its numeric match score (a
    /// zero score downgrades the verdict to indeterminate). Returns `true`
    /// once the decision is final and iteration can stop.
    pub fn push(&mut self, index: usize, verdict: Verdict, score: f64) -> bool {
        if self.decided.is_some() {
            return true;
        }
        let verdict = if score == 0.0 {
            Verdict::Indeterminate
        } else {
            verdict
        };

        match self.kind {
            EffectKind::SomeAllow => {
                if verdict == Verdict::Allow {
                    self.decided = Some(true);
                    self.explain = Some(index);
                }
            }
            EffectKind::NoDeny => {
                if verdict == Verdict::Deny {
                    self.decided = Some(false);
                    self.explain = Some(index);
                }
            }
            EffectKind::AllowAndNotDeny => match verdict {
                Verdict::Deny => {
                    self.decided = Some(false);
                    self.explain = Some(index);
                }
                Verdict::Allow if self.saw_allow.is_none() => {
                    self.saw_allow = Some(index);
                }
                _ => {}
            },
            EffectKind::Priority | EffectKind::SubjectPriority => {
                if verdict != Verdict::Indeterminate {
                    self.decided = Some(verdict == Verdict::Allow);
                    self.explain = Some(index);
                }
            }
        }
        self.decided.is_some()
    }

    /// Final decision plus the index of the decisive rule, if any.
    pub fn finish(self) -> (bool, Option<usize>) {
        if let Some(decision) = self.decided {
            return (decision, self.explain);
        }
        match self.kind {
            EffectKind::SomeAllow => (false, None),
            EffectKind::NoDeny => (true, None),
            // no deny seen; allow iff at least one allow matched
            EffectKind::AllowAndNotDeny => (self.saw_allow.is_some(), self.saw_allow),
            // no rule was decisive; priority falls through to deny
            EffectKind::Priority | EffectKind::SubjectPriority => (false, None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(kind: EffectKind, verdicts: &[Verdict]) -> (bool, Option<usize>) {
        let mut stream = EffectStream::new(kind);
        for (i, &v) in verdicts.iter().enumerate() {
            if stream.push(i, v, 1.0) {
                break;
            }
        }
        stream.finish()
    }

    #[test]
    fn test_parse_literals() {
        assert_eq!(
            EffectKind::parse("some(where (p_eft == allow))").unwrap(),
            EffectKind::SomeAllow
        );
        assert_eq!(
            EffectKind::parse("!some(where (p_eft == deny))").unwrap(),
            EffectKind::NoDeny
        );
        assert_eq!(
            EffectKind::parse("some(where (p_eft == allow)) && !some(where (p_eft == deny))")
                .unwrap(),
            EffectKind::AllowAndNotDeny
        );
        assert_eq!(
            EffectKind::parse("priority(p_eft) || deny").unwrap(),
            EffectKind::Priority
        );
        assert_eq!(
            EffectKind::parse("subjectPriority(p_eft) || deny").unwrap(),
            EffectKind::SubjectPriority
        );
        assert!(matches!(
            EffectKind::parse("some(where (p_eft == maybe))"),
            Err(PortcullisError::UnsupportedEffect(_))
        ));
    }

    #[test]
    fn test_some_allow() {
        use Verdict::*;
        assert_eq!(run(EffectKind::SomeAllow, &[]), (false, None));
        assert_eq!(
            run(EffectKind::SomeAllow, &[Indeterminate, Allow]),
            (true, Some(1))
        );
        assert_eq!(
            run(EffectKind::SomeAllow, &[Indeterminate, Indeterminate]),
            (false, None)
        );
        // a deny alone never allows
        assert_eq!(run(EffectKind::SomeAllow, &[Deny]), (false, None));
    }

    #[test]
    fn test_no_deny() {
        use Verdict::*;
        assert_eq!(run(EffectKind::NoDeny, &[]), (true, None));
        assert_eq!(run(EffectKind::NoDeny, &[Allow, Indeterminate]), (true, None));
        assert_eq!(run(EffectKind::NoDeny, &[Allow, Deny]), (false, Some(1)));
    }

    #[test]
    fn test_allow_and_not_deny() {
        use Verdict::*;
        // no rule matched at all -> deny
        assert_eq!(run(EffectKind::AllowAndNotDeny, &[]), (false, None));
        assert_eq!(
            run(EffectKind::AllowAndNotDeny, &[Indeterminate]),
            (false, None)
        );
        assert_eq!(
            run(EffectKind::AllowAndNotDeny, &[Allow, Indeterminate]),
            (true, Some(0))
        );
        assert_eq!(
            run(EffectKind::AllowAndNotDeny, &[Allow, Deny]),
            (false, Some(1))
        );
    }

    #[test]
    fn test_priority_first_decisive_wins() {
        use Verdict::*;
        assert_eq!(
            run(EffectKind::Priority, &[Indeterminate, Deny, Allow]),
            (false, Some(1))
        );
        assert_eq!(
            run(EffectKind::Priority, &[Allow, Deny]),
            (true, Some(0))
        );
        assert_eq!(run(EffectKind::Priority, &[Indeterminate]), (false, None));
    }

    #[test]
    fn test_priority_short_circuits() {
        let mut stream = EffectStream::new(EffectKind::Priority);
        assert!(!stream.push(0, Verdict::Indeterminate, 1.0));
        assert!(stream.push(1, Verdict::Deny, 1.0));
        // later verdicts cannot change anything
        assert!(stream.push(2, Verdict::Allow, 1.0));
        assert_eq!(stream.finish(), (false, Some(1)));
    }

    #[test]
    fn test_zero_score_is_indeterminate() {
        let mut stream = EffectStream::new(EffectKind::SomeAllow);
        stream.push(0, Verdict::Allow, 0.0);
        assert_eq!(stream.finish(), (false, None));
    }

    #[test]
    fn test_some_allow_monotone() {
        use Verdict::*;
        // any base sequence that allows keeps allowing when an allow is added
        let base = vec![Indeterminate, Allow, Indeterminate];
        let (before, _) = run(EffectKind::SomeAllow, &base);
        let mut extended = base.clone();
        extended.push(Allow);
        let (after, _) = run(EffectKind::SomeAllow, &extended);
        assert!(before);
        assert!(after);
    }
}
