//! Compose conjunctive SQL predicates from [`SearchFilters`], contributing
//! no clause for empty/null fields.

use crate::filters::SearchFilters;

#[derive(Debug, Clone)]
pub enum Bind {
    Text(String),
    Int(i64),
    Float(f64),
}

/// Build the full `WHERE` clause (including `missing_cost_only` and
/// `content_search`) plus its ordered bind values.
pub fn build_where(filters: &SearchFilters) -> (String, Vec<Bind>) {
    let (mut clause, mut binds) = build_status_where(filters);

    if filters.missing_cost_only {
        append_clause(&mut clause, "(cost IS NULL OR cost <= 0)");
    }
    if let Some(search) = &filters.content_search
        && !search.is_empty()
    {
        append_clause(&mut clause, "content_summary LIKE ?");
        binds.push(Bind::Text(format!("%{search}%")));
    }

    (clause, binds)
}

/// Every histogram flavour restricts to `status ∈ {success, error}` on top
/// of the caller's own filters.
pub fn build_histogram_where(filters: &SearchFilters) -> (String, Vec<Bind>) {
    let (mut clause, binds) = build_status_where(filters);
    append_clause(&mut clause, "status IN ('success', 'error')");
    (clause, binds)
}

/// Shared predicate set used both by `SearchLogs`/`GetStats` and (via
/// [`build_histogram_where`]) by every histogram flavour — this function
/// only contributes the filters common to both call sites.
pub fn build_status_where(filters: &SearchFilters) -> (String, Vec<Bind>) {
    let mut predicates: Vec<String> = Vec::new();
    let mut binds: Vec<Bind> = Vec::new();

    push_in_clause(&mut predicates, &mut binds, "provider", &filters.providers);
    push_in_clause(&mut predicates, &mut binds, "model", &filters.models);
    push_in_clause(&mut predicates, &mut binds, "status", &filters.status);
    push_in_clause(&mut predicates, &mut binds, "object_type", &filters.object_types);
    push_in_clause(&mut predicates, &mut binds, "selected_key_id", &filters.selected_key_ids);
    push_in_clause(&mut predicates, &mut binds, "virtual_key_id", &filters.virtual_key_ids);

    if let Some(start) = &filters.start_time {
        predicates.push("timestamp >= ?".to_string());
        binds.push(Bind::Text(start.clone()));
    }
    if let Some(end) = &filters.end_time {
        predicates.push("timestamp <= ?".to_string());
        binds.push(Bind::Text(end.clone()));
    }
    if let Some(min) = filters.min_latency {
        predicates.push("latency >= ?".to_string());
        binds.push(Bind::Int(min));
    }
    if let Some(max) = filters.max_latency {
        predicates.push("latency <= ?".to_string());
        binds.push(Bind::Int(max));
    }
    if let Some(min) = filters.min_total_tokens {
        predicates.push("total_tokens >= ?".to_string());
        binds.push(Bind::Int(min));
    }
    if let Some(max) = filters.max_total_tokens {
        predicates.push("total_tokens <= ?".to_string());
        binds.push(Bind::Int(max));
    }
    if let Some(min) = filters.min_cost {
        predicates.push("cost >= ?".to_string());
        binds.push(Bind::Float(min));
    }
    if let Some(max) = filters.max_cost {
        predicates.push("cost <= ?".to_string());
        binds.push(Bind::Float(max));
    }

    let clause =
        if predicates.is_empty() { String::new() } else { format!(" WHERE {}", predicates.join(" AND ")) };
    (clause, binds)
}

fn push_in_clause(predicates: &mut Vec<String>, binds: &mut Vec<Bind>, column: &str, values: &[String]) {
    if values.is_empty() {
        return;
    }
    let placeholders = std::iter::repeat("?").take(values.len()).collect::<Vec<_>>().join(", ");
    predicates.push(format!("{column} IN ({placeholders})"));
    binds.extend(values.iter().cloned().map(Bind::Text));
}

/// Append an extra predicate to an already-built clause, introducing the
/// leading ` WHERE ` if this is the first predicate.
pub fn append_clause(clause: &mut String, predicate: &str) {
    if clause.is_empty() {
        *clause = format!(" WHERE {predicate}");
    } else {
        clause.push_str(" AND ");
        clause.push_str(predicate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filters_produce_no_where_clause() {
        let (clause, binds) = build_where(&SearchFilters::default());
        assert!(clause.is_empty());
        assert!(binds.is_empty());
    }

    #[test]
    fn set_membership_filters_compose_conjunctively() {
        let filters = SearchFilters {
            providers: vec!["openai".to_string()],
            status: vec!["success".to_string(), "error".to_string()],
            ..Default::default()
        };
        let (clause, binds) = build_where(&filters);
        assert!(clause.contains("provider IN (?)"));
        assert!(clause.contains("status IN (?, ?)"));
        assert!(clause.contains(" AND "));
        assert_eq!(binds.len(), 3);
    }

    #[test]
    fn missing_cost_only_matches_null_or_non_positive() {
        let filters = SearchFilters { missing_cost_only: true, ..Default::default() };
        let (clause, _) = build_where(&filters);
        assert!(clause.contains("cost IS NULL OR cost <= 0"));
    }

    #[test]
    fn content_search_appends_like_predicate_with_wildcards() {
        let filters = SearchFilters { content_search: Some("hello".to_string()), ..Default::default() };
        let (clause, binds) = build_where(&filters);
        assert!(clause.contains("content_summary LIKE ?"));
        match &binds[0] {
            Bind::Text(s) => assert_eq!(s, "%hello%"),
            _ => panic!("expected text bind"),
        }
    }
}
