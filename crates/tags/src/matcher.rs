//! DNF tag matching (component C2).

use crate::dmp::{get_tag_value, DmpClient};
use abtree_core::{Options, Session, TagExpression, TagOperator, TagPredicate, TagValueType, UnitIdType};

/// Evaluate a DNF tag expression against `session`'s attributes, consulting
/// the DMP client for any predicate whose value must come from there.
///
/// `id_type` is the owning node's (group's or remote-config condition's)
/// declared [`UnitIdType`]; any DMP lookup resolves the unit id the same
/// NEW_ID-vs-standard way the bucket hash does, falling back to `unit_id`.
///
/// An empty conjunction list matches by convention. When `options.disable_dmp`
/// is set, any predicate carrying a `dmp_platform` makes the *whole*
/// expression evaluate `false` immediately, without issuing any lookup.
pub async fn matches(
    expr: &TagExpression,
    session: &Session,
    options: &mut Options,
    id_type: UnitIdType,
    dmp: &dyn DmpClient,
) -> bool {
    if expr.conjunctions.is_empty() {
        return true;
    }
    if options.disable_dmp && expr.conjunctions.iter().flatten().any(|p| p.dmp_platform.is_some()) {
        return false;
    }
    for conjunction in &expr.conjunctions {
        if matches_conjunction(conjunction, session, options, id_type, dmp).await {
            return true;
        }
    }
    false
}

async fn matches_conjunction(
    predicates: &[TagPredicate],
    session: &Session,
    options: &mut Options,
    id_type: UnitIdType,
    dmp: &dyn DmpClient,
) -> bool {
    for predicate in predicates {
        if !matches_predicate(predicate, session, options, id_type, dmp).await {
            return false;
        }
    }
    true
}

async fn matches_predicate(
    predicate: &TagPredicate,
    session: &Session,
    options: &mut Options,
    id_type: UnitIdType,
    dmp: &dyn DmpClient,
) -> bool {
    let resolved_value: Option<Vec<String>> = if let Some(platform) = &predicate.dmp_platform {
        let unit_id = session.hash_unit_id(id_type);
        match get_tag_value(dmp, unit_id, platform, &predicate.key, options).await {
            Some(v) => Some(vec![v]),
            None => None,
        }
    } else {
        session.attributes.get(&predicate.key).cloned()
    };

    let Some(actual) = resolved_value else {
        return false;
    };

    eval_operator(predicate, &actual)
}

fn eval_operator(predicate: &TagPredicate, actual: &[String]) -> bool {
    match predicate.operator {
        TagOperator::Equals => actual.iter().any(|a| predicate.value.iter().any(|v| v == a)),
        TagOperator::In => predicate.value.iter().any(|v| actual.iter().any(|a| a == v)),
        TagOperator::GreaterThan | TagOperator::LessThan => {
            if predicate.value_type != TagValueType::Number {
                return false;
            }
            let Some(threshold) = predicate.value.first().and_then(|v| v.parse::<f64>().ok()) else {
                return false;
            };
            actual.iter().filter_map(|a| a.parse::<f64>().ok()).any(|a| {
                if predicate.operator == TagOperator::GreaterThan {
                    a > threshold
                } else {
                    a < threshold
                }
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dmp::MockDmpClient;

    fn predicate(key: &str, op: TagOperator, values: &[&str]) -> TagPredicate {
        TagPredicate {
            key: key.to_string(),
            value_type: TagValueType::String,
            operator: op,
            value: values.iter().map(|s| s.to_string()).collect(),
            dmp_platform: None,
        }
    }

    #[tokio::test]
    async fn empty_expression_matches() {
        let mut options = Options::default();
        let dmp = MockDmpClient::default();
        let session = Session::new("u1");
        assert!(matches(&TagExpression::default(), &session, &mut options, UnitIdType::Standard, &dmp).await);
    }

    #[tokio::test]
    async fn dnf_matches_if_any_conjunction_matches() {
        let mut options = Options::default();
        let dmp = MockDmpClient::default();
        let session = Session::new("u1").with_attribute("country", "US");
        let expr = TagExpression {
            conjunctions: vec![
                vec![predicate("country", TagOperator::Equals, &["CN"])],
                vec![predicate("country", TagOperator::Equals, &["US"])],
            ],
        };
        assert!(matches(&expr, &session, &mut options, UnitIdType::Standard, &dmp).await);
    }

    #[tokio::test]
    async fn missing_attribute_fails_predicate() {
        let mut options = Options::default();
        let dmp = MockDmpClient::default();
        let session = Session::new("u1");
        let expr = TagExpression { conjunctions: vec![vec![predicate("country", TagOperator::Equals, &["US"])]] };
        assert!(!matches(&expr, &session, &mut options, UnitIdType::Standard, &dmp).await);
    }

    #[tokio::test]
    async fn disable_dmp_hard_fails_dmp_predicates() {
        let mut options = Options { disable_dmp: true, ..Default::default() };
        let dmp = MockDmpClient::default().with_value("platform-a", "segment", "vip");
        let session = Session::new("u1");
        let mut pred = predicate("segment", TagOperator::Equals, &["vip"]);
        pred.dmp_platform = Some("platform-a".to_string());
        let expr = TagExpression { conjunctions: vec![vec![pred]] };
        assert!(!matches(&expr, &session, &mut options, UnitIdType::Standard, &dmp).await);
    }

    #[tokio::test]
    async fn numeric_greater_than() {
        let mut options = Options::default();
        let dmp = MockDmpClient::default();
        let session = Session::new("u1").with_attribute("age", "30");
        let mut pred = predicate("age", TagOperator::GreaterThan, &["18"]);
        pred.value_type = TagValueType::Number;
        let expr = TagExpression { conjunctions: vec![vec![pred]] };
        assert!(matches(&expr, &session, &mut options, UnitIdType::Standard, &dmp).await);
    }
}
