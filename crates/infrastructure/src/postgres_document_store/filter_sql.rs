use serde_json::Value;
use shardwork_domain::{Comparison, DocumentKey, FieldPredicate, Filter, KEY_FIELD};
use sqlx::{Postgres, QueryBuilder};

/// Appends one `AND <predicate>` per filter predicate.
pub(super) fn push_filter(builder: &mut QueryBuilder<'static, Postgres>, filter: &Filter) {
    for predicate in filter.predicates() {
        builder.push(" AND ");
        if predicate.field == KEY_FIELD {
            push_key_predicate(builder, predicate);
        } else {
            push_field_predicate(builder, predicate);
        }
    }
}

fn operator(comparison: Comparison) -> Option<&'static str> {
    match comparison {
        Comparison::Eq => Some("="),
        Comparison::Ne => Some("<>"),
        Comparison::Gt => Some(">"),
        Comparison::Gte => Some(">="),
        Comparison::Lt => Some("<"),
        Comparison::Lte => Some("<="),
        Comparison::In | Comparison::Exists => None,
    }
}

fn in_candidates(value: &Value) -> &[Value] {
    match value {
        Value::Array(candidates) => candidates.as_slice(),
        _ => &[],
    }
}

fn push_any(
    builder: &mut QueryBuilder<'static, Postgres>,
    candidates: &[Value],
    mut push_one: impl FnMut(&mut QueryBuilder<'static, Postgres>, &Value),
) {
    if candidates.is_empty() {
        builder.push("FALSE");
        return;
    }

    builder.push("(");
    for (index, candidate) in candidates.iter().enumerate() {
        if index > 0 {
            builder.push(" OR ");
        }
        push_one(builder, candidate);
    }
    builder.push(")");
}

fn push_key_predicate(builder: &mut QueryBuilder<'static, Postgres>, predicate: &FieldPredicate) {
    match predicate.comparison {
        Comparison::Exists => {
            builder.push(if predicate.value.as_bool().unwrap_or(true) {
                "TRUE"
            } else {
                "FALSE"
            });
        }
        Comparison::In => push_any(builder, in_candidates(&predicate.value), |builder, key| {
            push_key_comparison(builder, Comparison::Eq, key);
        }),
        comparison => push_key_comparison(builder, comparison, &predicate.value),
    }
}

/// Compares against the generated key columns. Integer keys sort before
/// every string key.
fn push_key_comparison(
    builder: &mut QueryBuilder<'static, Postgres>,
    comparison: Comparison,
    value: &Value,
) {
    let Some(operator) = operator(comparison) else {
        builder.push("FALSE");
        return;
    };

    match DocumentKey::from_value(value) {
        Some(DocumentKey::Int(key)) => {
            builder.push("(key_int ");
            builder.push(operator);
            builder.push(" ");
            builder.push_bind(key);
            if matches!(comparison, Comparison::Ne | Comparison::Gt | Comparison::Gte) {
                builder.push(" OR key_text IS NOT NULL");
            }
            builder.push(")");
        }
        Some(DocumentKey::Str(key)) => {
            builder.push("(key_text ");
            builder.push(operator);
            builder.push(" ");
            builder.push_bind(key);
            if matches!(comparison, Comparison::Ne | Comparison::Lt | Comparison::Lte) {
                builder.push(" OR key_int IS NOT NULL");
            }
            builder.push(")");
        }
        None => {
            builder.push(if comparison == Comparison::Ne {
                "TRUE"
            } else {
                "FALSE"
            });
        }
    }
}

fn field_path(field: &str) -> Vec<String> {
    field.split('.').map(str::to_owned).collect()
}

fn push_json_at(builder: &mut QueryBuilder<'static, Postgres>, field: &str) {
    builder.push("(body #> ");
    builder.push_bind(field_path(field));
    builder.push("::text[])");
}

fn push_type_check(builder: &mut QueryBuilder<'static, Postgres>, field: &str, json_type: &str) {
    builder.push("jsonb_typeof");
    push_json_at(builder, field);
    builder.push(" = '");
    builder.push(json_type);
    builder.push("'");
}

fn push_field_predicate(builder: &mut QueryBuilder<'static, Postgres>, predicate: &FieldPredicate) {
    let field = predicate.field.as_str();

    match predicate.comparison {
        Comparison::Exists => {
            push_json_at(builder, field);
            builder.push(if predicate.value.as_bool().unwrap_or(true) {
                " IS NOT NULL"
            } else {
                " IS NULL"
            });
        }
        Comparison::Eq | Comparison::Ne => {
            push_equality(builder, field, predicate.comparison, &predicate.value);
        }
        Comparison::In => push_any(builder, in_candidates(&predicate.value), |builder, value| {
            push_equality(builder, field, Comparison::Eq, value);
        }),
        comparison => push_ordering(builder, field, comparison, &predicate.value),
    }
}

/// A missing field compares equal to JSON null.
fn push_equality(
    builder: &mut QueryBuilder<'static, Postgres>,
    field: &str,
    comparison: Comparison,
    value: &Value,
) {
    builder.push("COALESCE");
    builder.push("(");
    push_json_at(builder, field);
    builder.push(", 'null'::jsonb) ");
    builder.push(if comparison == Comparison::Ne { "<>" } else { "=" });
    builder.push(" ");
    builder.push_bind(value.clone());
    builder.push("::jsonb");
}

/// Orders numbers before strings and compares strings byte-wise; other
/// type pairs never match.
fn push_ordering(
    builder: &mut QueryBuilder<'static, Postgres>,
    field: &str,
    comparison: Comparison,
    value: &Value,
) {
    let Some(operator) = operator(comparison) else {
        builder.push("FALSE");
        return;
    };
    let upward = matches!(comparison, Comparison::Gt | Comparison::Gte);

    match value {
        Value::Number(_) | Value::Bool(_) => {
            let json_type = if value.is_number() { "number" } else { "boolean" };
            builder.push("((");
            push_type_check(builder, field, json_type);
            builder.push(" AND ");
            push_json_at(builder, field);
            builder.push(" ");
            builder.push(operator);
            builder.push(" ");
            builder.push_bind(value.clone());
            builder.push("::jsonb)");
            if upward && value.is_number() {
                builder.push(" OR ");
                push_type_check(builder, field, "string");
            }
            builder.push(")");
        }
        Value::String(text) => {
            builder.push("((");
            push_type_check(builder, field, "string");
            builder.push(" AND (body #>> ");
            builder.push_bind(field_path(field));
            builder.push("::text[]) COLLATE \"C\" ");
            builder.push(operator);
            builder.push(" ");
            builder.push_bind(text.clone());
            builder.push(")");
            if !upward {
                builder.push(" OR ");
                push_type_check(builder, field, "number");
            }
            builder.push(")");
        }
        Value::Null if matches!(comparison, Comparison::Gte | Comparison::Lte) => {
            push_type_check(builder, field, "null");
        }
        _ => {
            builder.push("FALSE");
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use shardwork_domain::Filter;
    use sqlx::{Postgres, QueryBuilder};

    use super::push_filter;

    fn sql(filter: &Filter) -> String {
        let mut builder: QueryBuilder<'static, Postgres> =
            QueryBuilder::new("SELECT body FROM documents WHERE collection = 'c'");
        push_filter(&mut builder, filter);
        builder.sql().to_owned()
    }

    #[test]
    fn key_predicates_use_key_columns() {
        let rendered = sql(&Filter::new().gt("_id", 10).eq("_id", "a"));

        assert!(rendered.contains("(key_int > $1 OR key_text IS NOT NULL)"));
        assert!(rendered.contains("(key_text = $2)"));
    }

    #[test]
    fn field_equality_treats_missing_as_null() {
        let rendered = sql(&Filter::new().eq("partitions.0.status", "eof"));

        assert!(rendered.contains("COALESCE((body #> $1::text[]), 'null'::jsonb) = $2::jsonb"));
    }

    #[test]
    fn empty_in_never_matches() {
        let rendered = sql(&Filter::new().is_in("ambit", Vec::new()));

        assert!(rendered.ends_with(" AND FALSE"));
    }

    #[test]
    fn string_ordering_is_bytewise_and_ranks_numbers_lower() {
        let rendered = sql(&Filter::new().with(
            "region",
            shardwork_domain::Comparison::Lt,
            json!("m"),
        ));

        assert!(rendered.contains("COLLATE \"C\" < $3"));
        assert!(rendered.contains("jsonb_typeof(body #> $4::text[]) = 'number'"));
    }
}
