//! Rule store and per-rule evaluation state: the crossing cache and the
//! cooldown clock. Only the engine touches these, under its write lock.

use crate::condition::Field;
use crate::error::{AlertError, AlertResult};
use crate::repository::StoredRule;
use crate::rule::AlertRule;
use crate::snapshot::Snapshot;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

/// Result of evaluating one rule against one ticker's snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    /// A referenced field is absent; the rule is skipped and no state moves.
    DataNotReady(Field),
    NoMatch,
    /// All conditions match but the rule fired too recently.
    CoolingDown { remaining: Duration },
    Triggered { field: Field, value: f64 },
}

/// Previous observed values, keyed by ticker then field. Wildcard rules keep
/// one series per ticker.
#[derive(Debug, Clone, Default)]
pub struct RuleState {
    previous: HashMap<String, HashMap<Field, f64>>,
}

impl RuleState {
    pub fn previous(&self, ticker: &str, field: Field) -> Option<f64> {
        self.previous.get(ticker)?.get(&field).copied()
    }

    fn observe(&mut self, ticker: &str, values: &HashMap<Field, f64>) {
        let series = self.previous.entry(ticker.to_string()).or_default();
        series.extend(values.iter().map(|(f, v)| (*f, *v)));
    }

    /// Keeps history only for fields the rule still references.
    fn retain_fields(&mut self, fields: &[Field]) {
        for series in self.previous.values_mut() {
            series.retain(|field, _| fields.contains(field));
        }
        self.previous.retain(|_, series| !series.is_empty());
    }
}

#[derive(Debug, Clone)]
pub struct RuleEntry {
    pub rule: AlertRule,
    pub created_at: DateTime<Utc>,
    pub state: RuleState,
}

impl RuleEntry {
    pub fn new(rule: AlertRule, created_at: DateTime<Utc>) -> Self {
        Self {
            rule,
            created_at,
            state: RuleState::default(),
        }
    }

    pub fn stored(&self) -> StoredRule {
        StoredRule {
            rule: self.rule.clone(),
            created_at: self.created_at,
        }
    }

    /// Evaluates all conditions (AND) and applies the cooldown gate.
    ///
    /// The previous-value cache is updated after a non-match and after a
    /// trigger, but not while cooling down, so a crossing that happens during
    /// cooldown is still seen once the window has elapsed.
    pub fn evaluate(&mut self, ticker: &str, snapshot: &Snapshot, now: DateTime<Utc>) -> Evaluation {
        let mut current = HashMap::new();
        for field in self.rule.fields() {
            match field.read(snapshot) {
                Some(value) => {
                    current.insert(field, value);
                }
                None => return Evaluation::DataNotReady(field),
            }
        }

        let matched = self.rule.conditions.iter().all(|c| {
            let value = current.get(&c.field).copied().unwrap_or(f64::NAN);
            c.matches(value, self.state.previous(ticker, c.field))
        });

        if !matched {
            self.state.observe(ticker, &current);
            return Evaluation::NoMatch;
        }

        if let Some(last) = self.rule.last_triggered_at {
            let elapsed = now - last;
            let cooldown = self.rule.cooldown();
            if elapsed < cooldown {
                return Evaluation::CoolingDown {
                    remaining: cooldown - elapsed,
                };
            }
        }

        self.rule.last_triggered_at = Some(now);
        self.state.observe(ticker, &current);
        // validate() guarantees at least one condition
        let field = self.rule.conditions.first().map(|c| c.field).unwrap_or(Field::Mean);
        Evaluation::Triggered {
            field,
            value: current.get(&field).copied().unwrap_or(f64::NAN),
        }
    }
}

/// Rules in insertion order.
#[derive(Debug, Default)]
pub struct RuleStore {
    order: Vec<String>,
    entries: HashMap<String, RuleEntry>,
}

impl RuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entry: RuleEntry) -> AlertResult<()> {
        let id = entry.rule.id.clone();
        if self.entries.contains_key(&id) {
            return Err(AlertError::DuplicateRuleId(id));
        }
        self.order.push(id.clone());
        self.entries.insert(id, entry);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&RuleEntry> {
        self.entries.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut RuleEntry> {
        self.entries.get_mut(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Replaces the definition. `last_triggered_at` and previous values for
    /// fields the new definition still references carry over.
    pub fn replace(&mut self, mut rule: AlertRule) -> AlertResult<&RuleEntry> {
        let entry = self
            .entries
            .get_mut(&rule.id)
            .ok_or_else(|| AlertError::RuleNotFound(rule.id.clone()))?;
        rule.last_triggered_at = entry.rule.last_triggered_at;
        entry.state.retain_fields(&rule.fields());
        entry.rule = rule;
        Ok(entry)
    }

    /// Removes the rule together with its evaluation state.
    pub fn remove(&mut self, id: &str) -> AlertResult<RuleEntry> {
        let removed = self
            .entries
            .remove(id)
            .ok_or_else(|| AlertError::RuleNotFound(id.to_string()))?;
        self.order.retain(|r| r != id);
        Ok(removed)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RuleEntry> {
        self.order.iter().filter_map(|id| self.entries.get(id))
    }

    pub fn rules(&self) -> Vec<AlertRule> {
        self.iter().map(|e| e.rule.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn enabled_count(&self) -> usize {
        self.entries.values().filter(|e| e.rule.enabled).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{Condition, Operator};
    use crate::rule::Action;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 9, 0, 0).unwrap()
    }

    fn crossing_rule() -> AlertRule {
        AlertRule::new("cross", "Mean crosses 0.6", "PETR4.SA")
            .with_condition(Condition::new(Field::Mean, Operator::CrossedAbove, 0.6))
            .with_action(Action::Log)
            .with_cooldown_minutes(0)
    }

    fn snap(mean: f64) -> Snapshot {
        Snapshot::default().with(Field::Mean, mean)
    }

    #[test]
    fn test_crossing_uses_previous_value() {
        let mut entry = RuleEntry::new(crossing_rule(), t0());
        assert_eq!(entry.evaluate("PETR4.SA", &snap(0.4), t0()), Evaluation::NoMatch);
        assert_eq!(
            entry.evaluate("PETR4.SA", &snap(0.7), t0()),
            Evaluation::Triggered { field: Field::Mean, value: 0.7 }
        );
        assert_eq!(entry.evaluate("PETR4.SA", &snap(0.8), t0()), Evaluation::NoMatch);
    }

    #[test]
    fn test_first_observation_never_crosses() {
        let mut entry = RuleEntry::new(crossing_rule(), t0());
        assert_eq!(entry.evaluate("PETR4.SA", &snap(0.7), t0()), Evaluation::NoMatch);
        assert_eq!(entry.state.previous("PETR4.SA", Field::Mean), Some(0.7));
    }

    #[test]
    fn test_missing_field_leaves_state_untouched() {
        let rule = crossing_rule().with_condition(Condition::new(Field::Volatility, Operator::GreaterThan, 0.5));
        let mut entry = RuleEntry::new(rule, t0());
        assert_eq!(
            entry.evaluate("PETR4.SA", &snap(0.4), t0()),
            Evaluation::DataNotReady(Field::Volatility)
        );
        assert_eq!(entry.state.previous("PETR4.SA", Field::Mean), None);
    }

    #[test]
    fn test_cooldown_gate() {
        let rule = AlertRule::new("hot", "Hot", "VALE3.SA")
            .with_condition(Condition::new(Field::Mean, Operator::GreaterThan, 0.6))
            .with_action(Action::Log);
        let mut entry = RuleEntry::new(rule, t0());
        assert!(matches!(entry.evaluate("VALE3.SA", &snap(0.7), t0()), Evaluation::Triggered { .. }));
        assert_eq!(
            entry.evaluate("VALE3.SA", &snap(0.7), t0() + Duration::minutes(10)),
            Evaluation::CoolingDown { remaining: Duration::minutes(20) }
        );
        assert!(matches!(
            entry.evaluate("VALE3.SA", &snap(0.7), t0() + Duration::minutes(30)),
            Evaluation::Triggered { .. }
        ));
    }

    #[test]
    fn test_replace_keeps_trigger_time_and_relevant_history() {
        let mut store = RuleStore::new();
        let mut entry = RuleEntry::new(crossing_rule(), t0());
        entry.rule.last_triggered_at = Some(t0());
        entry.state.observe("PETR4.SA", &HashMap::from([(Field::Mean, 0.4), (Field::Max, 0.9)]));
        store.insert(entry).unwrap();

        let updated = AlertRule::new("cross", "Renamed", "PETR4.SA")
            .with_condition(Condition::new(Field::Mean, Operator::CrossedBelow, 0.2))
            .with_action(Action::Log);
        let entry = store.replace(updated).unwrap();
        assert_eq!(entry.rule.name, "Renamed");
        assert_eq!(entry.rule.last_triggered_at, Some(t0()));
        assert_eq!(entry.state.previous("PETR4.SA", Field::Mean), Some(0.4));
        assert_eq!(entry.state.previous("PETR4.SA", Field::Max), None);

        assert!(matches!(store.remove("missing"), Err(AlertError::RuleNotFound(_))));
        assert!(store.remove("cross").is_ok());
        assert!(store.is_empty());
    }
}
