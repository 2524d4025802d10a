use std::cmp::Ordering;

use bson::{Bson, Document};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::RegexBuilder;

use crate::StoreError;

fn unsupported(what: impl Into<String>) -> StoreError {
    StoreError::Unsupported(what.into())
}

/// Resolves a dotted path through nested documents.
pub(super) fn lookup<'a>(document: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut segments = path.split('.');
    let mut current = document.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Bson::Document(inner) => inner.get(segment)?,
            _ => return None,
        };
    }
    Some(current)
}

pub(super) fn matches(document: &Document, filter: &Document) -> Result<bool, StoreError> {
    for (key, condition) in filter {
        let ok = match key.as_str() {
            "$and" => {
                let mut all = true;
                for sub in sub_filters(condition)? {
                    if !matches(document, sub)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => {
                let mut any = false;
                for sub in sub_filters(condition)? {
                    if matches(document, sub)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            op if op.starts_with('$') => return Err(unsupported(op)),
            path => field_matches(lookup(document, path), condition)?,
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn sub_filters(condition: &Bson) -> Result<Vec<&Document>, StoreError> {
    let Bson::Array(items) = condition else {
        return Err(unsupported("logical operator expects an array"));
    };
    items
        .iter()
        .map(|item| match item {
            Bson::Document(sub) => Ok(sub),
            _ => Err(unsupported("logical operator expects documents")),
        })
        .collect()
}

fn is_operator_document(document: &Document) -> bool {
    !document.is_empty() && document.keys().all(|k| k.starts_with('$'))
}

fn field_matches(value: Option<&Bson>, condition: &Bson) -> Result<bool, StoreError> {
    match condition {
        Bson::Document(ops) if is_operator_document(ops) => operators_match(value, ops),
        Bson::RegularExpression(regex) => regex_match(value, &regex.pattern, &regex.options),
        expected => Ok(equals(value.unwrap_or(&Bson::Null), expected)),
    }
}

fn operators_match(value: Option<&Bson>, ops: &Document) -> Result<bool, StoreError> {
    let present = value.unwrap_or(&Bson::Null);
    for (op, operand) in ops {
        let ok = match op.as_str() {
            "$eq" => equals(present, operand),
            "$ne" => !equals(present, operand),
            "$gt" => compare(value, operand) == Some(Ordering::Greater),
            "$gte" => matches!(
                compare(value, operand),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            "$lt" => compare(value, operand) == Some(Ordering::Less),
            "$lte" => matches!(
                compare(value, operand),
                Some(Ordering::Less | Ordering::Equal)
            ),
            "$in" => array_items(operand)?.iter().any(|c| equals(present, c)),
            "$nin" => !array_items(operand)?.iter().any(|c| equals(present, c)),
            "$exists" => value.is_some() == truthy(operand),
            "$type" => type_matches(value, operand)?,
            "$regex" => {
                let Bson::String(pattern) = operand else {
                    return Err(unsupported("$regex expects a string pattern"));
                };
                let options = ops.get_str("$options").unwrap_or("");
                regex_match(value, pattern, options)?
            }
            // consumed alongside $regex
            "$options" => true,
            other => return Err(unsupported(other)),
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn array_items(operand: &Bson) -> Result<&Vec<Bson>, StoreError> {
    match operand {
        Bson::Array(items) => Ok(items),
        _ => Err(unsupported("$in/$nin expect an array")),
    }
}

fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(n) => Some(f64::from(*n)),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(n) => Some(*n),
        _ => None,
    }
}

fn as_i64(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(n) => Some(i64::from(*n)),
        Bson::Int64(n) => Some(*n),
        Bson::Double(n) if n.fract() == 0.0 => Some(*n as i64),
        _ => None,
    }
}

fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(b) => *b,
        Bson::Null => false,
        other => as_f64(other).is_none_or(|n| n != 0.0),
    }
}

fn equals(a: &Bson, b: &Bson) -> bool {
    match (as_f64(a), as_f64(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// Comparison within one type bracket; values of different brackets never
/// satisfy a range operator.
fn compare(value: Option<&Bson>, operand: &Bson) -> Option<Ordering> {
    let value = value?;
    if let (Some(x), Some(y)) = (as_f64(value), as_f64(operand)) {
        return x.partial_cmp(&y);
    }
    match (value, operand) {
        (Bson::String(x), Bson::String(y)) => Some(x.cmp(y)),
        (Bson::DateTime(x), Bson::DateTime(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn type_matches(value: Option<&Bson>, operand: &Bson) -> Result<bool, StoreError> {
    let Bson::String(alias) = operand else {
        return Err(unsupported("$type expects a type alias"));
    };
    let Some(value) = value else {
        return Ok(false);
    };
    let ok = match alias.as_str() {
        "string" => matches!(value, Bson::String(_)),
        "date" => matches!(value, Bson::DateTime(_)),
        "double" => matches!(value, Bson::Double(_)),
        "int" => matches!(value, Bson::Int32(_)),
        "long" => matches!(value, Bson::Int64(_)),
        "number" => as_f64(value).is_some(),
        "null" => matches!(value, Bson::Null),
        "bool" => matches!(value, Bson::Boolean(_)),
        "object" => matches!(value, Bson::Document(_)),
        "array" => matches!(value, Bson::Array(_)),
        "objectId" => matches!(value, Bson::ObjectId(_)),
        other => return Err(unsupported(format!("$type alias `{}`", other))),
    };
    Ok(ok)
}

fn regex_match(value: Option<&Bson>, pattern: &str, options: &str) -> Result<bool, StoreError> {
    let Some(Bson::String(text)) = value else {
        return Ok(false);
    };
    let regex = RegexBuilder::new(pattern)
        .case_insensitive(options.contains('i'))
        .multi_line(options.contains('m'))
        .build()
        .map_err(|err| StoreError::Evaluation(format!("invalid regex: {}", err)))?;
    Ok(regex.is_match(text))
}

fn type_rank(value: Option<&Bson>) -> u8 {
    match value {
        None | Some(Bson::Null) => 0,
        Some(Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_)) => 1,
        Some(Bson::String(_)) => 2,
        Some(Bson::Document(_)) => 3,
        Some(Bson::Array(_)) => 4,
        Some(Bson::ObjectId(_)) => 5,
        Some(Bson::Boolean(_)) => 6,
        Some(Bson::DateTime(_)) => 7,
        Some(_) => 8,
    }
}

fn sort_order(a: Option<&Bson>, b: Option<&Bson>) -> Ordering {
    let by_type = type_rank(a).cmp(&type_rank(b));
    if by_type != Ordering::Equal {
        return by_type;
    }
    match (a, b) {
        (Some(Bson::String(x)), Some(Bson::String(y))) => x.cmp(y),
        (Some(Bson::ObjectId(x)), Some(Bson::ObjectId(y))) => x.bytes().cmp(&y.bytes()),
        (Some(Bson::Boolean(x)), Some(Bson::Boolean(y))) => x.cmp(y),
        (Some(Bson::DateTime(x)), Some(Bson::DateTime(y))) => x.cmp(y),
        (Some(x), Some(y)) => match (as_f64(x), as_f64(y)) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            _ => Ordering::Equal,
        },
        _ => Ordering::Equal,
    }
}

pub(super) fn sort_documents(documents: &mut [Document], spec: &Document) -> Result<(), StoreError> {
    let mut keys = Vec::with_capacity(spec.len());
    for (field, direction) in spec {
        let ascending = match as_i64(direction) {
            Some(1) => true,
            Some(-1) => false,
            _ => return Err(unsupported("sort direction must be 1 or -1")),
        };
        keys.push((field.as_str(), ascending));
    }

    documents.sort_by(|a, b| {
        for (field, ascending) in &keys {
            let ord = sort_order(lookup(a, field), lookup(b, field));
            let ord = if *ascending { ord } else { ord.reverse() };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
    Ok(())
}

pub(super) fn run_pipeline(
    documents: Vec<Document>,
    pipeline: &[Document],
) -> Result<Vec<Document>, StoreError> {
    let mut current = documents;
    for stage in pipeline {
        let mut entries = stage.iter();
        let (Some((name, spec)), None) = (entries.next(), entries.next()) else {
            return Err(unsupported("pipeline stage must hold exactly one operator"));
        };

        current = match name.as_str() {
            "$match" => {
                let filter = stage_document(name, spec)?;
                let mut kept = Vec::with_capacity(current.len());
                for document in current {
                    if matches(&document, filter)? {
                        kept.push(document);
                    }
                }
                kept
            }
            "$group" => group(&current, stage_document(name, spec)?)?,
            "$sort" => {
                sort_documents(&mut current, stage_document(name, spec)?)?;
                current
            }
            "$limit" => {
                current.truncate(stage_count(name, spec)?);
                current
            }
            "$skip" => current.into_iter().skip(stage_count(name, spec)?).collect(),
            "$project" => project(current, stage_document(name, spec)?)?,
            "$addFields" | "$set" => add_fields(current, stage_document(name, spec)?)?,
            other => return Err(unsupported(other)),
        };
    }
    Ok(current)
}

fn stage_document<'a>(name: &str, spec: &'a Bson) -> Result<&'a Document, StoreError> {
    match spec {
        Bson::Document(document) => Ok(document),
        _ => Err(unsupported(format!("{} expects a document", name))),
    }
}

fn stage_count(name: &str, spec: &Bson) -> Result<usize, StoreError> {
    as_i64(spec)
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| unsupported(format!("{} expects a non-negative integer", name)))
}

fn group(documents: &[Document], spec: &Document) -> Result<Vec<Document>, StoreError> {
    let id_expr = spec
        .get("_id")
        .ok_or_else(|| unsupported("$group requires _id"))?;

    let mut accumulators = Vec::new();
    for (field, accumulator) in spec {
        if field == "_id" {
            continue;
        }
        let operand = match accumulator {
            Bson::Document(acc) if acc.len() == 1 => acc
                .get("$sum")
                .ok_or_else(|| unsupported("only $sum accumulators are supported"))?,
            _ => return Err(unsupported("malformed $group accumulator")),
        };
        accumulators.push((field.as_str(), operand));
    }

    let mut groups: Vec<(Bson, Vec<i64>)> = Vec::new();
    for document in documents {
        let key = eval_expr(document, id_expr)?;
        let index = match groups.iter().position(|(k, _)| equals(k, &key)) {
            Some(index) => index,
            None => {
                groups.push((key, vec![0; accumulators.len()]));
                groups.len() - 1
            }
        };
        for (slot, (_, operand)) in accumulators.iter().enumerate() {
            let value = eval_expr(document, operand)?;
            groups[index].1[slot] += as_i64(&value).unwrap_or(0);
        }
    }

    Ok(groups
        .into_iter()
        .map(|(key, totals)| {
            let mut row = Document::new();
            row.insert("_id", key);
            for ((field, _), total) in accumulators.iter().zip(totals) {
                let value = match i32::try_from(total) {
                    Ok(small) => Bson::Int32(small),
                    Err(_) => Bson::Int64(total),
                };
                row.insert(*field, value);
            }
            row
        })
        .collect())
}

fn project(documents: Vec<Document>, spec: &Document) -> Result<Vec<Document>, StoreError> {
    let mut excluded = Vec::with_capacity(spec.len());
    for (field, flag) in spec {
        if truthy(flag) {
            return Err(unsupported("only exclusion projections are supported"));
        }
        excluded.push(field.as_str());
    }
    Ok(documents
        .into_iter()
        .map(|mut document| {
            for field in &excluded {
                document.remove(*field);
            }
            document
        })
        .collect())
}

fn add_fields(documents: Vec<Document>, spec: &Document) -> Result<Vec<Document>, StoreError> {
    let mut out = Vec::with_capacity(documents.len());
    for mut document in documents {
        let mut computed = Vec::with_capacity(spec.len());
        for (field, expr) in spec {
            computed.push((field.clone(), eval_expr(&document, expr)?));
        }
        for (field, value) in computed {
            document.insert(field, value);
        }
        out.push(document);
    }
    Ok(out)
}

fn eval_expr(document: &Document, expr: &Bson) -> Result<Bson, StoreError> {
    match expr {
        Bson::String(path) if path.starts_with('$') => {
            Ok(lookup(document, &path[1..]).cloned().unwrap_or(Bson::Null))
        }
        Bson::Document(op) if is_operator_document(op) => {
            let mut entries = op.iter();
            let (Some((name, args)), None) = (entries.next(), entries.next()) else {
                return Err(unsupported("expression must hold exactly one operator"));
            };
            match name.as_str() {
                "$ifNull" => if_null(document, args),
                "$dateFromString" => date_from_string(document, stage_document(name, args)?),
                "$literal" => Ok(args.clone()),
                other => Err(unsupported(other)),
            }
        }
        other => Ok(other.clone()),
    }
}

fn if_null(document: &Document, args: &Bson) -> Result<Bson, StoreError> {
    let Bson::Array(candidates) = args else {
        return Err(unsupported("$ifNull expects an array"));
    };
    let Some((fallback, leading)) = candidates.split_last() else {
        return Err(unsupported("$ifNull expects at least one argument"));
    };
    for candidate in leading {
        let value = eval_expr(document, candidate)?;
        if value != Bson::Null {
            return Ok(value);
        }
    }
    eval_expr(document, fallback)
}

fn date_from_string(document: &Document, spec: &Document) -> Result<Bson, StoreError> {
    let raw = eval_expr(document, spec.get("dateString").unwrap_or(&Bson::Null))?;
    let text = match raw {
        Bson::Null => {
            return match spec.get("onNull") {
                Some(expr) => eval_expr(document, expr),
                None => Ok(Bson::Null),
            };
        }
        Bson::String(text) => text,
        other => {
            return conversion_failure(document, spec, format!("not a string: {}", other));
        }
    };

    let parsed = match spec.get("format") {
        None => parse_iso(&text),
        Some(Bson::String(format)) => parse_with_format(&text, format),
        Some(_) => return Err(unsupported("$dateFromString format must be a string")),
    };

    match parsed {
        Some(instant) => Ok(Bson::DateTime(bson::DateTime::from_millis(
            instant.timestamp_millis(),
        ))),
        None => conversion_failure(document, spec, format!("cannot parse `{}`", text)),
    }
}

fn conversion_failure(
    document: &Document,
    spec: &Document,
    reason: String,
) -> Result<Bson, StoreError> {
    match spec.get("onError") {
        Some(expr) => eval_expr(document, expr),
        None => Err(StoreError::Evaluation(format!("$dateFromString {}", reason))),
    }
}

fn parse_iso(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(text) {
        return Some(instant.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn parse_with_format(text: &str, format: &str) -> Option<DateTime<Utc>> {
    let format = format.replace("%L", "%3f");
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, &format) {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(text, &format)
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn lookup_walks_nested_paths() {
        let document = doc! { "a": { "b": { "c": 3 } } };
        assert_eq!(lookup(&document, "a.b.c"), Some(&Bson::Int32(3)));
        assert_eq!(lookup(&document, "a.x"), None);
        assert_eq!(lookup(&document, "a.b.c.d"), None);
    }

    #[test]
    fn int_and_double_compare_equal() {
        let document = doc! { "n": 10 };
        assert!(matches(&document, &doc! { "n": 10.0 }).unwrap());
        assert!(matches(&document, &doc! { "n": { "$in": ["10", 10.0] } }).unwrap());
    }

    #[test]
    fn missing_field_behaves_like_null() {
        let document = doc! { "a": 1 };
        assert!(matches(&document, &doc! { "b": null }).unwrap());
        assert!(!matches(&document, &doc! { "b": { "$exists": true, "$nin": [null, ""] } }).unwrap());
    }

    #[test]
    fn sort_places_nulls_before_strings() {
        let mut documents = vec![doc! { "k": "b" }, doc! { "k": null }, doc! { "k": "a" }];
        sort_documents(&mut documents, &doc! { "k": 1 }).unwrap();
        assert_eq!(documents[0].get("k"), Some(&Bson::Null));
        assert_eq!(documents[1].get_str("k").unwrap(), "a");
    }

    #[test]
    fn date_from_string_without_on_error_fails() {
        let document = doc! { "d": "not a date" };
        let err = eval_expr(
            &document,
            &Bson::Document(doc! { "$dateFromString": { "dateString": "$d" } }),
        )
        .unwrap_err();
        assert!(matches!(err, StoreError::Evaluation(_)));
    }
}
