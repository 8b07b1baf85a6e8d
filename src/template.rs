//! SQL Template Binder (C4.3): formats an operation's SQL template with
//! per-run and per-batch placeholders.
//!
//! Templates are plain strings using `{placeholder}` markers drawn from a
//! closed set (see [`TemplateContext`]'s fields). Binding never falls back to
//! ad-hoc `format!` interpolation at the call site — every value that ends up
//! in a template goes through here so quoting and the null-projection branch
//! stay consistent across the dozen operation templates in `operations.rs`.

use crate::op_error::{GfoError, Result};
use crate::types::ColumnSpec;

/// The closed set of placeholders a template may reference. Binding fails if
/// any `{...}`-shaped token in the template isn't one of these.
const PLACEHOLDERS: &[&str] = &[
    "geometrycolumn",
    "input1_geometrycolumn",
    "input2_geometrycolumn",
    "input_layer",
    "input1_tmp_layer",
    "input2_tmp_layer",
    "input1_databasename",
    "input2_databasename",
    "columns_to_select_str",
    "layer1_columns_prefix_alias_str",
    "layer2_columns_prefix_alias_str",
    "layer2_columns_prefix_alias_null_str",
    "layer1_columns_from_subselect_str",
    "layer2_columns_from_subselect_str",
    "layer1_columns_prefix_str",
    "layer2_columns_prefix_str",
    "batch_filter",
];

/// Per-run and per-batch substitution values. Fields left `None` simply
/// aren't bound; a template referencing an unset placeholder is a binder bug
/// (operations.rs fills in every placeholder its own template actually uses).
#[derive(Default, Clone, Debug)]
pub struct TemplateContext {
    pub geometrycolumn: Option<String>,
    pub input1_geometrycolumn: Option<String>,
    pub input2_geometrycolumn: Option<String>,
    pub input_layer: Option<String>,
    pub input1_tmp_layer: Option<String>,
    pub input2_tmp_layer: Option<String>,
    pub input1_databasename: Option<String>,
    pub input2_databasename: Option<String>,
    pub columns_to_select_str: Option<String>,
    pub layer1_columns_prefix_alias_str: Option<String>,
    pub layer2_columns_prefix_alias_str: Option<String>,
    pub layer2_columns_prefix_alias_null_str: Option<String>,
    pub layer1_columns_from_subselect_str: Option<String>,
    pub layer2_columns_from_subselect_str: Option<String>,
    pub layer1_columns_prefix_str: Option<String>,
    pub layer2_columns_prefix_str: Option<String>,
    pub batch_filter: Option<String>,
}

impl TemplateContext {
    fn value_of(&self, placeholder: &str) -> Option<&str> {
        match placeholder {
            "geometrycolumn" => self.geometrycolumn.as_deref(),
            "input1_geometrycolumn" => self.input1_geometrycolumn.as_deref(),
            "input2_geometrycolumn" => self.input2_geometrycolumn.as_deref(),
            "input_layer" => self.input_layer.as_deref(),
            "input1_tmp_layer" => self.input1_tmp_layer.as_deref(),
            "input2_tmp_layer" => self.input2_tmp_layer.as_deref(),
            "input1_databasename" => self.input1_databasename.as_deref(),
            "input2_databasename" => self.input2_databasename.as_deref(),
            "columns_to_select_str" => self.columns_to_select_str.as_deref(),
            "layer1_columns_prefix_alias_str" => self.layer1_columns_prefix_alias_str.as_deref(),
            "layer2_columns_prefix_alias_str" => self.layer2_columns_prefix_alias_str.as_deref(),
            "layer2_columns_prefix_alias_null_str" => {
                self.layer2_columns_prefix_alias_null_str.as_deref()
            }
            "layer1_columns_from_subselect_str" => {
                self.layer1_columns_from_subselect_str.as_deref()
            }
            "layer2_columns_from_subselect_str" => {
                self.layer2_columns_from_subselect_str.as_deref()
            }
            "layer1_columns_prefix_str" => self.layer1_columns_prefix_str.as_deref(),
            "layer2_columns_prefix_str" => self.layer2_columns_prefix_str.as_deref(),
            "batch_filter" => self.batch_filter.as_deref(),
            _ => None,
        }
    }
}

/// Binds `template` against `ctx`, replacing every `{placeholder}` token.
/// Fails if a token outside the closed placeholder set survives, or if a
/// recognized placeholder has no bound value.
pub fn bind(template: &str, ctx: &TemplateContext) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let Some(close) = rest[open..].find('}') else {
            out.push_str(rest);
            rest = "";
            break;
        };
        let close = open + close;
        out.push_str(&rest[..open]);
        let name = &rest[open + 1..close];
        if !PLACEHOLDERS.contains(&name) {
            return Err(GfoError::Plan(format!("unknown template placeholder: {name}")));
        }
        let value = ctx
            .value_of(name)
            .ok_or_else(|| GfoError::Plan(format!("placeholder not bound: {name}")))?;
        out.push_str(value);
        rest = &rest[close + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Per §4.3 rule 1: identifiers in projections are always double-quoted.
fn quote_ident(name: &str) -> String {
    format!(r#""{name}""#)
}

/// Checks the caller's requested column list case-insensitively against the
/// input's actual columns (§4.3 rule 2); `None` means "project everything"
/// (rule 3).
pub fn resolve_projection<'a>(
    requested: Option<&[String]>,
    available: &'a [ColumnSpec],
) -> Result<Vec<&'a ColumnSpec>> {
    match requested {
        None => Ok(available.iter().collect()),
        Some(names) => {
            let mut resolved = Vec::with_capacity(names.len());
            let mut unknown = Vec::new();
            for name in names {
                match available
                    .iter()
                    .find(|spec| spec.name.eq_ignore_ascii_case(name))
                {
                    Some(spec) => resolved.push(spec),
                    None => unknown.push(name.clone()),
                }
            }
            if !unknown.is_empty() {
                return Err(GfoError::Precondition(format!(
                    "unknown column(s) in projection: {}",
                    unknown.join(", ")
                )));
            }
            Ok(resolved)
        }
    }
}

/// `columns_to_select_str`: a single-input leading-comma projection.
pub fn columns_to_select_str(columns: &[&ColumnSpec]) -> String {
    columns
        .iter()
        .map(|c| format!(", {}", quote_ident(&c.name)))
        .collect()
}

/// `layerN_columns_prefix_alias_str`: leading-comma, aliased with `prefix`.
pub fn columns_prefix_alias_str(columns: &[&ColumnSpec], prefix: &str) -> String {
    columns
        .iter()
        .map(|c| format!(", {} AS {}", quote_ident(&c.name), quote_ident(&format!("{prefix}{}", c.name))))
        .collect()
}

/// `layerN_columns_prefix_alias_null_str`: same shape, values forced `NULL`
/// (used in the outer-join branch of `join_by_location`/`split`).
pub fn columns_prefix_alias_null_str(columns: &[&ColumnSpec], prefix: &str) -> String {
    columns
        .iter()
        .map(|c| format!(", NULL AS {}", quote_ident(&format!("{prefix}{}", c.name))))
        .collect()
}

/// `layerN_columns_from_subselect_str`: the aliased names as referenced from
/// an enclosing subquery (no re-aliasing, just the already-prefixed name).
pub fn columns_from_subselect_str(columns: &[&ColumnSpec], prefix: &str) -> String {
    columns
        .iter()
        .map(|c| format!(", {}", quote_ident(&format!("{prefix}{}", c.name))))
        .collect()
}

/// `layerN_columns_prefix_str`: plain aliased-name fragment with no `AS`,
/// used in `GROUP BY` clauses.
pub fn columns_prefix_str(columns: &[&ColumnSpec], table_alias: &str) -> String {
    columns
        .iter()
        .map(|c| format!(", {}.{}", table_alias, quote_ident(&c.name)))
        .collect()
}

/// `batch_filter`: the per-batch rowid predicate (§4.3). Empty when the plan
/// has a single batch; otherwise `AND rowid >= a [AND rowid < b]`, qualified
/// with `layer1.` for two-layer templates.
pub fn batch_filter(range: &crate::batch::RowidRange, single_batch: bool, two_layer: bool) -> String {
    if single_batch {
        return String::new();
    }
    let column = if two_layer { "layer1.rowid" } else { "rowid" };
    match range.end {
        Some(end) => format!(" AND {column} >= {} AND {column} < {}", range.start, end),
        None => format!(" AND {column} >= {}", range.start),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ColumnType;

    fn spec(name: &str) -> ColumnSpec {
        ColumnSpec {
            name: name.to_string(),
            column_type: ColumnType::Varchar,
        }
    }

    #[test]
    fn binds_known_placeholders() {
        let ctx = TemplateContext {
            geometrycolumn: Some("geom".to_string()),
            batch_filter: Some("AND rowid >= 0".to_string()),
            ..Default::default()
        };
        let sql = bind(
            "SELECT {geometrycolumn} FROM t WHERE 1=1 {batch_filter}",
            &ctx,
        )
        .unwrap();
        assert_eq!(sql, "SELECT geom FROM t WHERE 1=1 AND rowid >= 0");
    }

    #[test]
    fn rejects_unknown_placeholder() {
        let ctx = TemplateContext::default();
        let err = bind("SELECT {not_a_real_one}", &ctx).unwrap_err();
        assert!(err.to_string().contains("unknown template placeholder"));
    }

    #[test]
    fn rejects_unbound_known_placeholder() {
        let ctx = TemplateContext::default();
        let err = bind("SELECT {geometrycolumn}", &ctx).unwrap_err();
        assert!(err.to_string().contains("placeholder not bound"));
    }

    #[test]
    fn resolve_projection_rejects_unknown_column_case_insensitively() {
        let available = vec![spec("Name"), spec("Value")];
        let ok = resolve_projection(Some(&["name".to_string()]), &available).unwrap();
        assert_eq!(ok.len(), 1);

        let err = resolve_projection(Some(&["bogus".to_string()]), &available).unwrap_err();
        assert!(err.to_string().contains("bogus"));
    }

    #[test]
    fn columns_to_select_str_quotes_and_leads_with_comma() {
        let columns = vec![spec("name")];
        let refs: Vec<&ColumnSpec> = columns.iter().collect();
        assert_eq!(columns_to_select_str(&refs), r#", "name""#);
    }

    #[test]
    fn batch_filter_is_empty_for_single_batch() {
        use crate::batch::RowidRange;
        let range = RowidRange { start: 0, end: Some(10) };
        assert_eq!(batch_filter(&range, true, false), "");
    }

    #[test]
    fn batch_filter_qualifies_with_layer1_for_two_layer_templates() {
        use crate::batch::RowidRange;
        let range = RowidRange { start: 5, end: None };
        assert_eq!(
            batch_filter(&range, false, true),
            " AND layer1.rowid >= 5"
        );
    }
}
