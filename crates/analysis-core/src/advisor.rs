//! Pattern-matches top-function entries and allocation profiles against
//! configured [`SuggestionRule`]s to synthesize [`Suggestion`]s (spec §4.5
//! step 7).

use crate::analysis::{AnalyzerPayload, RuleTargetType, Suggestion, SuggestionRule};

/// Runs every rule against `payload`, merging with `analyzer_suggestions`
/// (advice the analyzer itself produced). Unmatched rules contribute
/// nothing; this never fails, so advice synthesis is always best-effort.
#[must_use]
pub fn synthesize_advice(
    payload: &AnalyzerPayload,
    rules: &[SuggestionRule],
    analyzer_suggestions: &[Suggestion],
) -> Vec<Suggestion> {
    let mut merged: Vec<Suggestion> = analyzer_suggestions.to_vec();
    merged.extend(match payload {
        AnalyzerPayload::Cpu { top_functions } => top_functions
            .iter()
            .flat_map(|entry| {
                rules.iter().filter_map(move |rule| {
                    let tag = match rule.target_type {
                        RuleTargetType::CpuHotness => None, // matches on self_percent directly
                        RuleTargetType::GcOverhead => Some("gc"),
                        RuleTargetType::LockContention => Some("lock"),
                        RuleTargetType::Reflection => Some("reflection"),
                        RuleTargetType::FrequentAllocation => return None,
                    };
                    let matches = match tag {
                        Some(tag) => entry.tags.iter().any(|t| t == tag) && entry.self_percent >= rule.threshold,
                        None => entry.name == rule.target && entry.self_percent >= rule.threshold,
                    };
                    matches.then(|| render_suggestion(rule, &entry.name))
                })
            })
            .collect(),
        AnalyzerPayload::Allocation { allocations } => allocations
            .iter()
            .flat_map(|entry| {
                rules.iter().filter_map(move |rule| {
                    (rule.target_type == RuleTargetType::FrequentAllocation
                        && entry.type_name == rule.target
                        && entry.allocations_per_sec >= rule.threshold)
                        .then(|| render_suggestion(rule, &entry.type_name))
                })
            })
            .collect(),
        AnalyzerPayload::Heap { .. }
        | AnalyzerPayload::MemoryLeak { .. }
        | AnalyzerPayload::Tracing { .. }
        | AnalyzerPayload::PprofBatch { .. } => Vec::new(),
    });
    merged
}

fn render_suggestion(rule: &SuggestionRule, matched_on: &str) -> Suggestion {
    Suggestion {
        text: rule.content_template.replace("{target}", matched_on),
        rule_target: Some(rule.target.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cpu_hotness_rule() -> SuggestionRule {
        SuggestionRule {
            target: "HotLoop::run".to_string(),
            target_type: RuleTargetType::CpuHotness,
            threshold: 50.0,
            content_template: "hotspot {target}".to_string(),
        }
    }

    #[test]
    fn cpu_hotness_rule_matches_named_function_over_threshold() {
        let payload = AnalyzerPayload::Cpu {
            top_functions: vec![crate::analysis::TopFunctionEntry {
                name: "HotLoop::run".to_string(),
                self_percent: 75.0,
                tags: vec![],
            }],
        };
        let advice = synthesize_advice(&payload, &[cpu_hotness_rule()], &[]);
        assert_eq!(advice.len(), 1);
        assert!(advice[0].text.contains("HotLoop::run"));
    }

    #[test]
    fn cpu_hotness_rule_does_not_match_below_threshold() {
        let payload = AnalyzerPayload::Cpu {
            top_functions: vec![crate::analysis::TopFunctionEntry {
                name: "HotLoop::run".to_string(),
                self_percent: 10.0,
                tags: vec![],
            }],
        };
        let advice = synthesize_advice(&payload, &[cpu_hotness_rule()], &[]);
        assert!(advice.is_empty());
    }

    #[test]
    fn gc_overhead_rule_matches_by_tag_not_name() {
        let rule = SuggestionRule {
            target: "gc-overhead".to_string(),
            target_type: RuleTargetType::GcOverhead,
            threshold: 20.0,
            content_template: "GC overhead detected in {target}".to_string(),
        };
        let payload = AnalyzerPayload::Cpu {
            top_functions: vec![crate::analysis::TopFunctionEntry {
                name: "java.lang.ref.Finalizer.runFinalizer".to_string(),
                self_percent: 25.0,
                tags: vec!["gc".to_string()],
            }],
        };
        let advice = synthesize_advice(&payload, &[rule], &[]);
        assert_eq!(advice.len(), 1);
        assert!(advice[0].text.contains("Finalizer"));
    }

    #[test]
    fn frequent_allocation_rule_matches_allocation_profiles() {
        let rule = SuggestionRule {
            target: "java.lang.String".to_string(),
            target_type: RuleTargetType::FrequentAllocation,
            threshold: 1000.0,
            content_template: "frequent allocation of {target}".to_string(),
        };
        let payload = AnalyzerPayload::Allocation {
            allocations: vec![crate::analysis::AllocationEntry {
                type_name: "java.lang.String".to_string(),
                allocations_per_sec: 5000.0,
            }],
        };
        let advice = synthesize_advice(&payload, &[rule], &[]);
        assert_eq!(advice.len(), 1);
    }

    #[test]
    fn analyzer_suggestions_are_preserved_alongside_rule_matches() {
        let payload = AnalyzerPayload::Heap { retained_bytes: 1024 };
        let analyzer_suggestions = vec![Suggestion {
            text: "large retained set".to_string(),
            rule_target: None,
        }];
        let advice = synthesize_advice(&payload, &[], &analyzer_suggestions);
        assert_eq!(advice.len(), 1);
        assert_eq!(advice[0].text, "large retained set");
    }
}
