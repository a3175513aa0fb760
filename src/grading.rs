use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradingScheme {
    pub grade: String,
    pub min_mark: i64,
    pub max_mark: i64,
    #[serde(default)]
    pub division: Option<String>,
    #[serde(default)]
    pub points: Option<i64>,
}

impl GradingScheme {
    pub fn contains(&self, mark: i64) -> bool {
        self.min_mark <= mark && mark <= self.max_mark
    }
}

/// Division buckets, best (I) to fail (0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Division {
    I,
    II,
    III,
    IV,
    Zero,
}

impl Division {
    pub const ALL: [Division; 5] = [
        Division::I,
        Division::II,
        Division::III,
        Division::IV,
        Division::Zero,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Division::I => "Division I",
            Division::II => "Division II",
            Division::III => "Division III",
            Division::IV => "Division IV",
            Division::Zero => "Division 0",
        }
    }

    pub fn is_pass(self) -> bool {
        self != Division::Zero
    }

    /// Accepts "I", "Division I", "division ii", "1".."4" and "0".
    /// Anything unrecognised is treated as a fail bucket.
    pub fn from_label(raw: &str) -> Division {
        let t = raw.trim();
        let t = t
            .strip_prefix("Division")
            .or_else(|| t.strip_prefix("division"))
            .or_else(|| t.strip_prefix("DIVISION"))
            .unwrap_or(t)
            .trim();
        match t.to_ascii_uppercase().as_str() {
            "I" | "1" => Division::I,
            "II" | "2" => Division::II,
            "III" | "3" => Division::III,
            "IV" | "4" => Division::IV,
            _ => Division::Zero,
        }
    }
}

/// Stable sort by `min_mark` ascending. Resolution always runs on this order.
pub fn sort_schemes(schemes: &mut [GradingScheme]) {
    schemes.sort_by(|a, b| a.min_mark.cmp(&b.min_mark));
}

pub fn sorted_schemes(schemes: &[GradingScheme]) -> Vec<GradingScheme> {
    let mut out = schemes.to_vec();
    sort_schemes(&mut out);
    out
}

/// First scheme in `min_mark` order whose range contains `mark`, whatever
/// order the slice arrives in. Ties on `min_mark` keep input order, as
/// `sort_schemes` does. A missing or uncovered mark is ungraded.
pub fn resolve(mark: Option<i64>, schemes: &[GradingScheme]) -> Option<&GradingScheme> {
    let mark = mark?;
    schemes
        .iter()
        .filter(|s| s.contains(mark))
        .min_by_key(|s| s.min_mark)
}

pub fn division_from_grade(grade: &str) -> Division {
    match grade.trim().to_ascii_uppercase().as_str() {
        "A" => Division::I,
        "B" => Division::II,
        "C" => Division::III,
        "D" => Division::IV,
        _ => Division::Zero,
    }
}

/// Label for an average-based division: the scheme's own division column
/// wins, otherwise the grade letter table.
pub fn division_label_for_average(average: f64, schemes: &[GradingScheme]) -> String {
    match resolve(Some(round_to_int(average)), schemes) {
        Some(s) => match s.division.as_deref() {
            Some(d) if !d.trim().is_empty() => d.to_string(),
            _ => division_from_grade(&s.grade).label().to_string(),
        },
        None => Division::Zero.label().to_string(),
    }
}

pub fn division_bucket_for_average(average: f64, schemes: &[GradingScheme]) -> Division {
    Division::from_label(&division_label_for_average(average, schemes))
}

/// NECTA-style thresholds over a best-N points total.
pub fn division_from_points(points_total: i64) -> Division {
    if points_total >= 34 {
        Division::Zero
    } else if points_total >= 26 {
        Division::IV
    } else if points_total >= 22 {
        Division::III
    } else if points_total >= 18 {
        Division::II
    } else {
        Division::I
    }
}

pub fn competency_band(gpa: f64) -> &'static str {
    if gpa <= 2.0 {
        "Grade B (Very Good)"
    } else if gpa <= 3.0 {
        "Grade C (Good)"
    } else if gpa <= 4.0 {
        "Grade D (Satisfactory)"
    } else {
        "Grade F (Fail)"
    }
}

/// Half-up rounding to 2 decimals: `Int(100*x + 0.5) / 100`.
pub fn round_2(x: f64) -> f64 {
    ((100.0 * x) + 0.5).floor() / 100.0
}

/// Half-up rounding to 1 decimal: `Int(10*x + 0.5) / 10`.
pub fn round_off_1_decimal(x: f64) -> f64 {
    ((10.0 * x) + 0.5).floor() / 10.0
}

pub fn round_to_int(x: f64) -> i64 {
    (x + 0.5).floor() as i64
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageIssue {
    pub from: i64,
    pub to: i64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub grades: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageReport {
    pub gaps: Vec<CoverageIssue>,
    pub overlaps: Vec<CoverageIssue>,
}

impl CoverageReport {
    pub fn is_complete(&self) -> bool {
        self.gaps.is_empty() && self.overlaps.is_empty()
    }
}

/// Walks every integer mark in [0,100] and reports uncovered runs and
/// runs claimed by more than one row. Informational only.
pub fn validate_coverage(schemes: &[GradingScheme]) -> CoverageReport {
    let sorted = sorted_schemes(schemes);
    let mut report = CoverageReport::default();

    let mut gap_start: Option<i64> = None;
    let mut overlap: Option<(i64, Vec<String>)> = None;

    for mark in 0..=100_i64 {
        let matching: Vec<String> = sorted
            .iter()
            .filter(|s| s.contains(mark))
            .map(|s| s.grade.clone())
            .collect();

        if matching.is_empty() {
            if gap_start.is_none() {
                gap_start = Some(mark);
            }
        } else if let Some(start) = gap_start.take() {
            report.gaps.push(CoverageIssue {
                from: start,
                to: mark - 1,
                grades: Vec::new(),
            });
        }

        let same_run = matches!(&overlap, Some((_, g)) if *g == matching);
        if !same_run {
            if let Some((start, grades)) = overlap.take() {
                report.overlaps.push(CoverageIssue {
                    from: start,
                    to: mark - 1,
                    grades,
                });
            }
            if matching.len() > 1 {
                overlap = Some((mark, matching));
            }
        }
    }
    if let Some(start) = gap_start {
        report.gaps.push(CoverageIssue {
            from: start,
            to: 100,
            grades: Vec::new(),
        });
    }
    if let Some((start, grades)) = overlap {
        report.overlaps.push(CoverageIssue {
            from: start,
            to: 100,
            grades,
        });
    }
    report
}

/// Default table seeded into an empty workspace.
pub fn default_schemes() -> Vec<GradingScheme> {
    [("A", 75, 100, 1), ("B", 65, 74, 2), ("C", 45, 64, 3), ("D", 30, 44, 4), ("F", 0, 29, 5)]
        .iter()
        .map(|(grade, min, max, pts)| GradingScheme {
            grade: grade.to_string(),
            min_mark: *min,
            max_mark: *max,
            division: None,
            points: Some(*pts),
        })
        .collect()
}
