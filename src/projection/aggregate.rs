//! Per-group footer summaries.

use crate::models::{Aggregation, CellValue, Column, ColumnType, Item};

#[derive(Debug, Clone, PartialEq)]
pub enum Summary {
    /// Numeric aggregate; `None` when no cell holds a number
    Number {
        aggregation: Aggregation,
        value: Option<f64>,
    },
    /// Count per option label, in option order, followed by unknown labels
    Distribution(Vec<LabelCount>),
    /// Cells with a non-empty value
    Filled { filled: usize, total: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LabelCount {
    pub label: String,
    pub color: Option<String>,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSummary {
    pub column_id: String,
    pub summary: Summary,
}

pub fn summarize(columns: &[Column], items: &[&Item]) -> Vec<ColumnSummary> {
    columns
        .iter()
        .map(|column| ColumnSummary {
            column_id: column.id.clone(),
            summary: summarize_column(column, items),
        })
        .collect()
}

fn summarize_column(column: &Column, items: &[&Item]) -> Summary {
    let cells: Vec<&CellValue> = items
        .iter()
        .filter_map(|item| item.values.get(&column.id))
        .collect();

    match column.kind {
        ColumnType::Number => {
            let aggregation = column.aggregation.unwrap_or(Aggregation::Sum);
            let numbers: Vec<f64> = cells.iter().filter_map(|c| c.as_number()).collect();
            Summary::Number {
                aggregation,
                value: aggregate(aggregation, &numbers),
            }
        }
        ColumnType::Status | ColumnType::Dropdown => {
            let mut counts: Vec<LabelCount> = column
                .options
                .iter()
                .map(|o| LabelCount {
                    label: o.label.clone(),
                    color: Some(o.color.clone()),
                    count: 0,
                })
                .collect();
            for label in cells.iter().flat_map(|c| c.labels(column)) {
                match counts.iter_mut().find(|lc| lc.label == label) {
                    Some(lc) => lc.count += 1,
                    None => counts.push(LabelCount {
                        label,
                        color: None,
                        count: 1,
                    }),
                }
            }
            Summary::Distribution(counts)
        }
        _ => Summary::Filled {
            filled: cells.iter().filter(|c| !c.is_empty()).count(),
            total: items.len(),
        },
    }
}

fn aggregate(aggregation: Aggregation, numbers: &[f64]) -> Option<f64> {
    if aggregation == Aggregation::Count {
        return Some(numbers.len() as f64);
    }
    if numbers.is_empty() {
        return None;
    }
    let sum: f64 = numbers.iter().sum();
    Some(match aggregation {
        Aggregation::Sum => sum,
        Aggregation::Avg => sum / numbers.len() as f64,
        Aggregation::Min => numbers.iter().copied().fold(f64::INFINITY, f64::min),
        Aggregation::Max => numbers.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        Aggregation::Count => numbers.len() as f64,
    })
}
