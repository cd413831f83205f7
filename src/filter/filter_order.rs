use super::error::FilterError;
use super::types::{FilterOrderInfo, SortDirection};
use super::Filter;

pub struct FilterOrder;

impl FilterOrder {
    /// Zip `order-by` columns with `order-by-sort` directions. Missing directions
    /// default to ascending; surplus directions are an error.
    pub fn from_lists(columns: &[String], sorts: &[String]) -> Result<Vec<FilterOrderInfo>, FilterError> {
        if sorts.len() > columns.len() {
            return Err(FilterError::InvalidOrder(format!(
                "{} sort directions given for {} order columns",
                sorts.len(),
                columns.len()
            )));
        }
        columns
            .iter()
            .enumerate()
            .map(|(i, column)| {
                let sort = match sorts.get(i) {
                    Some(s) => s.parse()?,
                    None => SortDirection::Asc,
                };
                Ok(FilterOrderInfo { column: column.clone(), sort })
            })
            .collect()
    }

    pub fn generate(infos: &[FilterOrderInfo]) -> String {
        if infos.is_empty() {
            return String::new();
        }
        let parts: Vec<String> = infos
            .iter()
            .map(|i| format!("{} {}", Filter::quote_identifier(&i.column), i.sort.to_sql()))
            .collect();
        format!("ORDER BY {}", parts.join(", "))
    }
}
