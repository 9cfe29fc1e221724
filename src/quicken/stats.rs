//! Specialization statistics and site instrumentation
//!
//! Counters are kept per family and cover the whole life cycle of a site:
//! adaptive executions, specialization attempts, guard outcomes and
//! deoptimizations. None of this feeds back into execution.

use super::family::QuickOp;
use crate::bytecode::{Family, Opcode};
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Why a specializer refused a site
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecFailure {
    /// Name or attribute could not be resolved
    NotFound,
    /// A namespace or object has no usable version tag
    Unversioned,
    /// The resolved slot index does not fit the cache entry
    IndexOutOfRange,
    /// Call arity differs from the callee's parameter count
    ArityMismatch,
    /// Callee kind has no specialized member
    UnsupportedCallee,
    /// Receiver kind has no specialized member
    UnsupportedReceiver,
    /// Operand types have no specialized member
    UnsupportedOperands,
}

impl SpecFailure {
    pub fn name(self) -> &'static str {
        match self {
            SpecFailure::NotFound => "not_found",
            SpecFailure::Unversioned => "unversioned",
            SpecFailure::IndexOutOfRange => "index_out_of_range",
            SpecFailure::ArityMismatch => "arity_mismatch",
            SpecFailure::UnsupportedCallee => "unsupported_callee",
            SpecFailure::UnsupportedReceiver => "unsupported_receiver",
            SpecFailure::UnsupportedOperands => "unsupported_operands",
        }
    }
}

impl fmt::Display for SpecFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Counters for one instruction family
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FamilyStats {
    /// Executions of the adaptive member
    pub adaptive: u64,
    /// Specialization attempts that rewrote the site
    pub success: u64,
    /// Specialization attempts that were refused
    pub failure: u64,
    /// Guard hits in specialized members
    pub hit: u64,
    /// Guard misses in specialized members
    pub miss: u64,
    /// Rewrites back to the adaptive member
    pub deopt: u64,
}

/// Specialization statistics collected by one interpreter
#[derive(Debug, Clone, Default)]
pub struct SpecializationStats {
    families: [FamilyStats; Family::COUNT],
    failures: FxHashMap<(Family, SpecFailure), u64>,
    /// Code units quickened
    pub quickened_units: u64,
    /// Quickening attempts that failed and left the unit unquickened
    pub quicken_failures: u64,
}

impl SpecializationStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counters for a family
    pub fn family(&self, family: Family) -> &FamilyStats {
        &self.families[family.index()]
    }

    pub(crate) fn family_mut(&mut self, family: Family) -> &mut FamilyStats {
        &mut self.families[family.index()]
    }

    /// Count a refused specialization attempt
    pub(crate) fn record_failure(&mut self, family: Family, reason: SpecFailure) {
        self.family_mut(family).failure += 1;
        *self.failures.entry((family, reason)).or_insert(0) += 1;
    }

    /// Refusals of one kind for a family
    pub fn failures(&self, family: Family, reason: SpecFailure) -> u64 {
        self.failures.get(&(family, reason)).copied().unwrap_or(0)
    }

    /// Sum of a counter over every family
    pub fn total(&self, counter: impl Fn(&FamilyStats) -> u64) -> u64 {
        self.families.iter().map(counter).sum()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Serializable snapshot with stable ordering
    pub fn report(&self) -> StatsReport {
        let families = Family::ALL
            .iter()
            .map(|&family| {
                let failures = self
                    .failures
                    .iter()
                    .filter(|((f, _), _)| *f == family)
                    .map(|((_, reason), count)| (reason.name().to_string(), *count))
                    .collect();
                (
                    family.name().to_string(),
                    FamilyReport {
                        counters: *self.family(family),
                        failures,
                    },
                )
            })
            .collect();
        StatsReport {
            quickened_units: self.quickened_units,
            quicken_failures: self.quicken_failures,
            families,
        }
    }

    /// Export as pretty JSON
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(&self.report()).unwrap_or_default()
    }
}

impl fmt::Display for SpecializationStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "quickened units: {}  quicken failures: {}",
            self.quickened_units, self.quicken_failures
        )?;
        writeln!(
            f,
            "{:<12} {:>10} {:>8} {:>8} {:>10} {:>8} {:>6}",
            "family", "adaptive", "success", "failure", "hit", "miss", "deopt"
        )?;
        for family in Family::ALL {
            let s = self.family(family);
            writeln!(
                f,
                "{:<12} {:>10} {:>8} {:>8} {:>10} {:>8} {:>6}",
                family.name(),
                s.adaptive,
                s.success,
                s.failure,
                s.hit,
                s.miss,
                s.deopt
            )?;
        }
        Ok(())
    }
}

/// JSON shape of [`SpecializationStats`]
#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub quickened_units: u64,
    pub quicken_failures: u64,
    pub families: BTreeMap<String, FamilyReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FamilyReport {
    #[serde(flatten)]
    pub counters: FamilyStats,
    pub failures: BTreeMap<String, u64>,
}

/// Current state of one family site in a quickened unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SiteState {
    /// Cache offset did not fit the operand; the site runs the generic opcode forever
    Unquickened,
    Adaptive { executions: u8 },
    Specialized { counter: u8 },
}

/// Instrumentation record for one family site
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SiteInfo {
    pub position: usize,
    pub opcode: Opcode,
    pub op: QuickOp,
    #[serde(flatten)]
    pub state: SiteState,
}

impl fmt::Display for SiteInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.state {
            SiteState::Unquickened => write!(f, "{:04} {:24} unquickened", self.position, self.op.name()),
            SiteState::Adaptive { executions } => write!(
                f,
                "{:04} {:24} adaptive executions={}",
                self.position,
                self.op.name(),
                executions
            ),
            SiteState::Specialized { counter } => write!(
                f,
                "{:04} {:24} specialized counter={}",
                self.position,
                self.op.name(),
                counter
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_failure_reasons_are_counted_per_family() {
        let mut stats = SpecializationStats::new();
        stats.record_failure(Family::Call, SpecFailure::ArityMismatch);
        stats.record_failure(Family::Call, SpecFailure::ArityMismatch);
        stats.record_failure(Family::LoadAttr, SpecFailure::NotFound);

        assert_eq!(stats.family(Family::Call).failure, 2);
        assert_eq!(stats.failures(Family::Call, SpecFailure::ArityMismatch), 2);
        assert_eq!(stats.failures(Family::LoadAttr, SpecFailure::ArityMismatch), 0);
        assert_eq!(stats.total(|s| s.failure), 3);
    }

    #[test]
    fn test_json_report() {
        let mut stats = SpecializationStats::new();
        stats.quickened_units = 2;
        stats.family_mut(Family::BinaryAdd).success = 1;
        stats.family_mut(Family::BinaryAdd).hit = 40;
        stats.record_failure(Family::BinaryAdd, SpecFailure::UnsupportedOperands);

        let json: serde_json::Value = serde_json::from_str(&stats.to_json()).unwrap();
        assert_eq!(json["quickened_units"], 2);
        assert_eq!(json["families"]["binary_add"]["hit"], 40);
        assert_eq!(json["families"]["binary_add"]["failure"], 1);
        assert_eq!(
            json["families"]["binary_add"]["failures"]["unsupported_operands"],
            1
        );
        assert_eq!(json["families"]["call"]["success"], 0);
    }

    #[test]
    fn test_reset() {
        let mut stats = SpecializationStats::new();
        stats.family_mut(Family::LoadGlobal).deopt = 3;
        stats.reset();
        assert_eq!(*stats.family(Family::LoadGlobal), FamilyStats::default());
    }

    #[test]
    fn test_site_display() {
        let site = SiteInfo {
            position: 7,
            opcode: Opcode::Call,
            op: QuickOp::adaptive(Family::Call),
            state: SiteState::Adaptive { executions: 3 },
        };
        assert_eq!(site.to_string(), format!("0007 {:24} adaptive executions=3", "CallAdaptive"));
    }
}
