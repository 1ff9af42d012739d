use std::fmt;

/// Student ids look like `22cs078`: 2-digit cohort year, 2-letter
/// department, then the roll sequence. Sequence numbers render
/// zero-padded to 3 digits; input is case-insensitive.
const YEAR_LEN: usize = 2;
const DEPT_LEN: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudentIdParts {
    pub cohort_year: String,
    pub department: String,
    pub sequence: u32,
}

/// An inclusive sequence interval within one cohort-year/department pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeSpec {
    pub cohort_year: String,
    pub department: String,
    pub start_seq: u32,
    pub end_seq: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeError {
    Malformed(String),
    Mismatch { start: String, end: String },
    Order { start_seq: u32, end_seq: u32 },
}

impl RangeError {
    pub fn code(&self) -> &'static str {
        match self {
            RangeError::Malformed(_) => "malformed_range",
            RangeError::Mismatch { .. } => "range_mismatch",
            RangeError::Order { .. } => "range_order",
        }
    }

    pub fn message(&self) -> String {
        match self {
            RangeError::Malformed(detail) => detail.clone(),
            RangeError::Mismatch { start, end } => format!(
                "range may not span cohorts or departments: {} vs {}",
                start, end
            ),
            RangeError::Order { start_seq, end_seq } => format!(
                "range start must not exceed range end: {} > {}",
                start_seq, end_seq
            ),
        }
    }
}

impl fmt::Display for RangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

pub fn format_student_id(cohort_year: &str, department: &str, sequence: u32) -> String {
    format!("{}{}{:03}", cohort_year, department, sequence)
}

pub fn parse_student_id(token: &str) -> Result<StudentIdParts, RangeError> {
    let token = token.trim().to_ascii_lowercase();
    // split_at below needs byte offsets == char offsets.
    if !token.is_ascii() || token.len() <= YEAR_LEN + DEPT_LEN {
        return Err(RangeError::Malformed(format!(
            "student id must look like 22cs078, got '{}'",
            token
        )));
    }

    let (year, rest) = token.split_at(YEAR_LEN);
    let (dept, seq) = rest.split_at(DEPT_LEN);

    if !year.chars().all(|c| c.is_ascii_digit()) {
        return Err(RangeError::Malformed(format!(
            "cohort year must be 2 digits, got '{}'",
            year
        )));
    }
    if !dept.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(RangeError::Malformed(format!(
            "department must be 2 letters, got '{}'",
            dept
        )));
    }
    if seq.is_empty() || !seq.chars().all(|c| c.is_ascii_digit()) {
        return Err(RangeError::Malformed(format!(
            "sequence must be a number, got '{}'",
            seq
        )));
    }
    let sequence: u32 = seq.parse().map_err(|_| {
        RangeError::Malformed(format!("sequence must be a number, got '{}'", seq))
    })?;

    Ok(StudentIdParts {
        cohort_year: year.to_string(),
        department: dept.to_string(),
        sequence,
    })
}

pub fn parse_range(raw: &str) -> Result<RangeSpec, RangeError> {
    let raw = raw.trim();
    let parts: Vec<&str> = raw.split('-').collect();
    if parts.len() != 2 || parts[0].trim().is_empty() || parts[1].trim().is_empty() {
        return Err(RangeError::Malformed(format!(
            "range must be two student ids joined by '-', got '{}'",
            raw
        )));
    }

    let start = parse_student_id(parts[0])?;
    let end = parse_student_id(parts[1])?;

    if start.cohort_year != end.cohort_year || start.department != end.department {
        return Err(RangeError::Mismatch {
            start: format_student_id(&start.cohort_year, &start.department, start.sequence),
            end: format_student_id(&end.cohort_year, &end.department, end.sequence),
        });
    }
    if start.sequence > end.sequence {
        return Err(RangeError::Order {
            start_seq: start.sequence,
            end_seq: end.sequence,
        });
    }

    Ok(RangeSpec {
        cohort_year: start.cohort_year,
        department: start.department,
        start_seq: start.sequence,
        end_seq: end.sequence,
    })
}

impl RangeSpec {
    /// Canonical form: lower-cased, zero-padded. `parse_range(canonical())`
    /// round-trips.
    pub fn canonical(&self) -> String {
        format!(
            "{}-{}",
            format_student_id(&self.cohort_year, &self.department, self.start_seq),
            format_student_id(&self.cohort_year, &self.department, self.end_seq)
        )
    }

    /// Every student id the range denotes, ascending. Deterministic; the
    /// allocation engine leans on that for idempotency.
    pub fn expand(&self) -> Vec<String> {
        (self.start_seq..=self.end_seq)
            .map(|i| format_student_id(&self.cohort_year, &self.department, i))
            .collect()
    }

    pub fn covers(&self, parts: &StudentIdParts) -> bool {
        parts.cohort_year == self.cohort_year
            && parts.department == self.department
            && parts.sequence >= self.start_seq
            && parts.sequence <= self.end_seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_canonical_range() {
        let spec = parse_range("22cs078-22cs082").expect("parse");
        assert_eq!(spec.cohort_year, "22");
        assert_eq!(spec.department, "cs");
        assert_eq!(spec.start_seq, 78);
        assert_eq!(spec.end_seq, 82);
    }

    #[test]
    fn input_is_case_insensitive_and_trimmed() {
        let spec = parse_range("  22CS078-22Cs082 ").expect("parse");
        assert_eq!(spec.canonical(), "22cs078-22cs082");
    }

    #[test]
    fn canonical_round_trips() {
        let spec = RangeSpec {
            cohort_year: "23".to_string(),
            department: "ec".to_string(),
            start_seq: 5,
            end_seq: 120,
        };
        assert_eq!(parse_range(&spec.canonical()).expect("reparse"), spec);
    }

    #[test]
    fn expansion_is_inclusive_and_ordered() {
        let spec = parse_range("22cs078-22cs082").expect("parse");
        let ids = spec.expand();
        assert_eq!(
            ids,
            vec!["22cs078", "22cs079", "22cs080", "22cs081", "22cs082"]
        );
        assert_eq!(ids.len() as u32, spec.end_seq - spec.start_seq + 1);
    }

    #[test]
    fn single_student_range_expands_to_one_id() {
        let spec = parse_range("22cs078-22cs078").expect("parse");
        assert_eq!(spec.expand(), vec!["22cs078"]);
    }

    #[test]
    fn expansion_envelope_recovers_bounds() {
        let spec = parse_range("22cs009-22cs013").expect("parse");
        let ids = spec.expand();
        let first = parse_student_id(ids.first().expect("first")).expect("parse first");
        let last = parse_student_id(ids.last().expect("last")).expect("parse last");
        assert_eq!(first.sequence, spec.start_seq);
        assert_eq!(last.sequence, spec.end_seq);
    }

    #[test]
    fn missing_separator_is_malformed() {
        let err = parse_range("22cs078").expect_err("should fail");
        assert_eq!(err.code(), "malformed_range");
    }

    #[test]
    fn empty_side_is_malformed() {
        assert_eq!(
            parse_range("22cs078-").expect_err("should fail").code(),
            "malformed_range"
        );
        assert_eq!(
            parse_range("-22cs078").expect_err("should fail").code(),
            "malformed_range"
        );
    }

    #[test]
    fn non_numeric_sequence_is_malformed() {
        let err = parse_range("22csabc-22cs078").expect_err("should fail");
        assert_eq!(err.code(), "malformed_range");
    }

    #[test]
    fn cohort_or_department_mismatch_is_rejected() {
        let err = parse_range("22cs078-23ce080").expect_err("should fail");
        assert_eq!(err.code(), "range_mismatch");
        let err = parse_range("22cs078-22ce080").expect_err("should fail");
        assert_eq!(err.code(), "range_mismatch");
    }

    #[test]
    fn inverted_order_is_rejected() {
        let err = parse_range("22cs082-22cs078").expect_err("should fail");
        assert_eq!(err.code(), "range_order");
    }

    #[test]
    fn covers_checks_prefix_and_interval() {
        let spec = parse_range("22cs078-22cs082").expect("parse");
        let inside = parse_student_id("22cs080").expect("parse");
        let below = parse_student_id("22cs077").expect("parse");
        let other_dept = parse_student_id("22ce080").expect("parse");
        assert!(spec.covers(&inside));
        assert!(!spec.covers(&below));
        assert!(!spec.covers(&other_dept));
    }

    #[test]
    fn sequences_wider_than_three_digits_survive() {
        let spec = parse_range("22cs0999-22cs1001").expect("parse");
        assert_eq!(spec.expand(), vec!["22cs999", "22cs1000", "22cs1001"]);
    }
}
