use crate::error::{ServeError, ServeResult};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{collections::HashMap, sync::Arc};

/// A raw request record: field name to scalar JSON value.
pub type Record = serde_json::Map<String, Value>;

/// How a dimension turns tokens into codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DimensionKind {
    /// The token is a real number and encodes as itself.
    Numeric,
    /// The token is looked up in the fitted code table.
    Categorical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionMapping {
    pub name: String,
    pub kind: DimensionKind,
    #[serde(default)]
    pub codes: HashMap<String, f64>,
}

/// Per-dimension token to code mapping, fitted once over a training corpus.
///
/// Categorical codes are handed out as `0, 1, 2, …` in order of first
/// appearance within each dimension and never change once assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDictionary {
    dimensions: Vec<DimensionMapping>,
}

impl FieldDictionary {
    /// Fit a dictionary over `rows`, one token per field in `field_names` order.
    ///
    /// A column is numeric when every one of its tokens parses as a finite real.
    pub fn fit<S: AsRef<str>>(field_names: &[S], rows: &[Vec<S>]) -> ServeResult<Self> {
        if field_names.is_empty() {
            return Err(ServeError::EmptyInput("dictionary needs at least one field".to_string()));
        }
        if rows.is_empty() {
            return Err(ServeError::EmptyInput("training corpus has no rows".to_string()));
        }
        check_row_widths(field_names.len(), rows)?;

        let dimensions = field_names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let numeric = rows
                    .iter()
                    .all(|row| parse_numeric(normalize_token(row[i].as_ref())).is_some());
                DimensionMapping {
                    name: name.as_ref().to_string(),
                    kind: if numeric {
                        DimensionKind::Numeric
                    } else {
                        DimensionKind::Categorical
                    },
                    codes: HashMap::new(),
                }
            })
            .collect();

        let mut dictionary = Self { dimensions };
        dictionary.extend(rows)?;
        Ok(dictionary)
    }

    /// Observe more rows. Existing codes are kept; unseen categorical tokens get
    /// the next free code. The whole batch is rejected if any numeric column
    /// receives a non-numeric token.
    pub fn extend<S: AsRef<str>>(&mut self, rows: &[Vec<S>]) -> ServeResult<()> {
        check_row_widths(self.dimensions.len(), rows)?;

        for row in rows {
            for (dimension, raw) in self.dimensions.iter().zip(row) {
                let token = normalize_token(raw.as_ref());
                if dimension.kind == DimensionKind::Numeric && parse_numeric(token).is_none() {
                    return Err(ServeError::UnknownToken {
                        field: dimension.name.clone(),
                        token: token.to_string(),
                    });
                }
            }
        }

        for row in rows {
            for (dimension, raw) in self.dimensions.iter_mut().zip(row) {
                if dimension.kind == DimensionKind::Categorical {
                    let next = dimension.codes.len() as f64;
                    dimension
                        .codes
                        .entry(normalize_token(raw.as_ref()).to_string())
                        .or_insert(next);
                }
            }
        }

        Ok(())
    }

    /// Code for `token` in the given dimension.
    pub fn lookup(&self, dimension: usize, token: &str) -> ServeResult<f64> {
        let mapping = self
            .dimensions
            .get(dimension)
            .ok_or(ServeError::DimensionMismatch {
                expected: self.dimensions.len(),
                actual: dimension + 1,
            })?;
        let token = normalize_token(token);

        let code = match mapping.kind {
            DimensionKind::Numeric => parse_numeric(token),
            DimensionKind::Categorical => mapping.codes.get(token).copied(),
        };

        code.ok_or_else(|| ServeError::UnknownToken {
            field: mapping.name.clone(),
            token: token.to_string(),
        })
    }

    pub fn dimension_count(&self) -> usize {
        self.dimensions.len()
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.dimensions.iter().map(|d| d.name.as_str()).collect()
    }

    pub fn index_of(&self, field: &str) -> Option<usize> {
        self.dimensions.iter().position(|d| d.name == field)
    }

    pub fn kind(&self, dimension: usize) -> Option<DimensionKind> {
        self.dimensions.get(dimension).map(|d| d.kind)
    }

    /// Number of distinct tokens seen for a categorical dimension, 0 for numeric.
    pub fn category_count(&self, dimension: usize) -> usize {
        self.dimensions.get(dimension).map_or(0, |d| d.codes.len())
    }
}

fn check_row_widths<S: AsRef<str>>(width: usize, rows: &[Vec<S>]) -> ServeResult<()> {
    match rows.iter().find(|row| row.len() != width) {
        Some(row) => Err(ServeError::DimensionMismatch {
            expected: width,
            actual: row.len(),
        }),
        None => Ok(()),
    }
}

/// Trim whitespace and drop one pair of enclosing double quotes.
pub fn normalize_token(raw: &str) -> &str {
    let trimmed = raw.trim();
    trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(trimmed)
}

fn parse_numeric(token: &str) -> Option<f64> {
    token.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Turns named-field records into fixed-length feature vectors.
///
/// Index `i` of every vector produced corresponds to `dimension_order[i]`.
#[derive(Debug, Clone)]
pub struct FeatureEncoder {
    dictionary: Arc<FieldDictionary>,
    dimension_order: Vec<String>,
    dictionary_index: Vec<usize>,
}

impl FeatureEncoder {
    pub fn new(dictionary: Arc<FieldDictionary>, dimension_order: Vec<String>) -> ServeResult<Self> {
        let dictionary_index = dimension_order
            .iter()
            .map(|field| {
                dictionary
                    .index_of(field)
                    .ok_or_else(|| ServeError::UnknownDimension { field: field.clone() })
            })
            .collect::<ServeResult<Vec<_>>>()?;

        Ok(Self {
            dictionary,
            dimension_order,
            dictionary_index,
        })
    }

    /// Encoder whose dimension order is the dictionary's own field order.
    pub fn from_dictionary(dictionary: Arc<FieldDictionary>) -> Self {
        let dimension_order = dictionary
            .field_names()
            .into_iter()
            .map(String::from)
            .collect();
        let dictionary_index = (0..dictionary.dimension_count()).collect();
        Self {
            dictionary,
            dimension_order,
            dictionary_index,
        }
    }

    pub fn encode(&self, record: &Record) -> ServeResult<DVector<f64>> {
        let mut features = DVector::zeros(self.dimension_order.len());
        for (i, (field, &dimension)) in self
            .dimension_order
            .iter()
            .zip(&self.dictionary_index)
            .enumerate()
        {
            let value = record
                .get(field)
                .ok_or_else(|| ServeError::MissingField { field: field.clone() })?;
            let token = token_of(field, value)?;
            features[i] = self.dictionary.lookup(dimension, &token)?;
        }
        Ok(features)
    }

    /// Encode a batch into a matrix with one row per record.
    pub fn encode_batch(&self, records: &[Record]) -> ServeResult<DMatrix<f64>> {
        let width = self.dimension_count();
        let mut data = Vec::with_capacity(records.len() * width);
        for record in records {
            data.extend(self.encode(record)?.iter());
        }
        Ok(DMatrix::from_row_slice(records.len(), width, &data))
    }

    pub fn dimension_order(&self) -> &[String] {
        &self.dimension_order
    }

    pub fn dimension_count(&self) -> usize {
        self.dimension_order.len()
    }

    pub fn dictionary(&self) -> &FieldDictionary {
        &self.dictionary
    }
}

/// Canonical token for a scalar value. Numbers use serde_json's formatting,
/// which is also how numeric cells are written when a corpus is exported.
fn token_of(field: &str, value: &Value) -> ServeResult<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => Err(ServeError::InvalidValue {
            field: field.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_dictionary, sample_record};
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_fit_detects_dimension_kinds() {
        let dictionary = sample_dictionary();
        let gender = dictionary.index_of("gender").unwrap();
        let tenure = dictionary.index_of("tenure").unwrap();

        assert_eq!(dictionary.kind(gender), Some(DimensionKind::Categorical));
        assert_eq!(dictionary.kind(tenure), Some(DimensionKind::Numeric));
        assert_eq!(dictionary.category_count(gender), 2);
        assert_eq!(dictionary.category_count(tenure), 0);
    }

    #[test]
    fn test_codes_follow_first_appearance() {
        let dictionary = FieldDictionary::fit(
            &["Contract"],
            &[vec!["Month-to-month"], vec!["Two year"], vec!["Month-to-month"], vec!["One year"]],
        )
        .unwrap();

        assert_eq!(dictionary.lookup(0, "Month-to-month").unwrap(), 0.0);
        assert_eq!(dictionary.lookup(0, "Two year").unwrap(), 1.0);
        assert_eq!(dictionary.lookup(0, "One year").unwrap(), 2.0);
    }

    #[test]
    fn test_extend_is_append_only() {
        let mut dictionary =
            FieldDictionary::fit(&["PaymentMethod"], &[vec!["Mailed check"], vec!["Electronic check"]])
                .unwrap();
        dictionary
            .extend(&[vec!["Bank transfer (automatic)"], vec!["Mailed check"]])
            .unwrap();

        assert_eq!(dictionary.lookup(0, "Mailed check").unwrap(), 0.0);
        assert_eq!(dictionary.lookup(0, "Electronic check").unwrap(), 1.0);
        assert_eq!(dictionary.lookup(0, "Bank transfer (automatic)").unwrap(), 2.0);
    }

    #[test]
    fn test_extend_rejects_text_in_numeric_column_without_partial_update() {
        let mut dictionary =
            FieldDictionary::fit(&["gender", "tenure"], &[vec!["Male", "1"], vec!["Female", "34"]])
                .unwrap();
        let before = dictionary.clone();

        let err = dictionary
            .extend(&[vec!["Other", "12"], vec!["Male", "n/a"]])
            .unwrap_err();

        assert!(matches!(err, ServeError::UnknownToken { ref field, .. } if field == "tenure"));
        assert_eq!(dictionary, before);
    }

    #[test]
    fn test_fit_rejects_ragged_rows() {
        let err = FieldDictionary::fit(&["a", "b"], &[vec!["1", "2"], vec!["3"]]).unwrap_err();
        assert_eq!(err, ServeError::DimensionMismatch { expected: 2, actual: 1 });
    }

    #[test]
    fn test_encode_is_deterministic() {
        let encoder = FeatureEncoder::from_dictionary(Arc::new(sample_dictionary()));
        let input = sample_record();

        let first = encoder.encode(&input).unwrap();
        let second = encoder.encode(&input).unwrap();

        assert_eq!(first.len(), encoder.dimension_count());
        assert_eq!(first, second);
    }

    #[test]
    fn test_permuted_order_permutes_vector() {
        let dictionary = Arc::new(sample_dictionary());
        let forward = FeatureEncoder::from_dictionary(dictionary.clone());
        let mut reversed_order = forward.dimension_order().to_vec();
        reversed_order.reverse();
        let reversed = FeatureEncoder::new(dictionary, reversed_order).unwrap();

        let input = sample_record();
        let a = forward.encode(&input).unwrap();
        let b = reversed.encode(&input).unwrap();

        let n = a.len();
        for i in 0..n {
            assert_eq!(a[i], b[n - 1 - i]);
        }
    }

    #[test]
    fn test_unknown_token_is_rejected() {
        let encoder = FeatureEncoder::from_dictionary(Arc::new(sample_dictionary()));
        let mut input = sample_record();
        input.insert("Contract".to_string(), json!("Weekly"));

        let err = encoder.encode(&input).unwrap_err();
        assert_eq!(
            err,
            ServeError::UnknownToken {
                field: "Contract".to_string(),
                token: "Weekly".to_string(),
            }
        );
    }

    #[test]
    fn test_missing_field_is_rejected() {
        let encoder = FeatureEncoder::from_dictionary(Arc::new(sample_dictionary()));
        let mut input = sample_record();
        input.remove("tenure");

        let err = encoder.encode(&input).unwrap_err();
        assert_eq!(err, ServeError::MissingField { field: "tenure".to_string() });
    }

    #[test]
    fn test_quoted_strings_are_unwrapped() {
        let dictionary = Arc::new(FieldDictionary::fit(&["Partner"], &[vec!["Yes"], vec!["No"]]).unwrap());
        let encoder = FeatureEncoder::from_dictionary(dictionary);

        let plain = encoder.encode(&record(json!({"Partner": "No"}))).unwrap();
        let quoted = encoder.encode(&record(json!({"Partner": "\"No\""}))).unwrap();

        assert_eq!(plain[0], 1.0);
        assert_eq!(plain, quoted);
    }

    #[test]
    fn test_numbers_and_booleans_use_canonical_tokens() {
        let dictionary = Arc::new(
            FieldDictionary::fit(
                &["SeniorCitizen", "PaperlessBilling", "MonthlyCharges"],
                &[vec!["1", "true", "29.85"], vec!["0", "false", "56.95"]],
            )
            .unwrap(),
        );
        let encoder = FeatureEncoder::from_dictionary(dictionary);

        let encoded = encoder
            .encode(&record(json!({
                "SeniorCitizen": 1,
                "PaperlessBilling": false,
                "MonthlyCharges": 56.95,
            })))
            .unwrap();

        assert_eq!(encoded.as_slice(), &[1.0, 1.0, 56.95]);
    }

    #[test]
    fn test_null_value_is_invalid() {
        let encoder = FeatureEncoder::from_dictionary(Arc::new(sample_dictionary()));
        let mut input = sample_record();
        input.insert("gender".to_string(), Value::Null);

        let err = encoder.encode(&input).unwrap_err();
        assert_eq!(err, ServeError::InvalidValue { field: "gender".to_string() });
    }

    #[test]
    fn test_encoder_rejects_unknown_dimension() {
        let err = FeatureEncoder::new(Arc::new(sample_dictionary()), vec!["customerID".to_string()])
            .unwrap_err();
        assert_eq!(err, ServeError::UnknownDimension { field: "customerID".to_string() });
    }

    #[test]
    fn test_encode_batch_stacks_rows() {
        let encoder = FeatureEncoder::from_dictionary(Arc::new(sample_dictionary()));
        let first = sample_record();
        let mut second = sample_record();
        second.insert("tenure".to_string(), json!(70));

        let matrix = encoder.encode_batch(&[first.clone(), second]).unwrap();

        assert_eq!(matrix.shape(), (2, encoder.dimension_count()));
        assert_eq!(matrix.row(0).transpose(), encoder.encode(&first).unwrap());
        let tenure = encoder.dictionary().index_of("tenure").unwrap();
        assert_eq!(matrix[(1, tenure)], 70.0);
    }

    #[test]
    fn test_normalize_token() {
        assert_eq!(normalize_token("  Yes "), "Yes");
        assert_eq!(normalize_token("\"Fiber optic\""), "Fiber optic");
        assert_eq!(normalize_token("\""), "\"");
        assert_eq!(normalize_token("\"\"x\"\""), "\"x\"");
    }
}
