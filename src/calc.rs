use crate::grading::{
    competency_band, division_bucket_for_average, division_from_points,
    division_label_for_average, resolve, round_2, round_off_1_decimal, round_to_int, Division,
    GradingScheme,
};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

/// One mark row as read for aggregation. `class_level` comes from the
/// owning student and is absent when the student row is gone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkRecord {
    pub exam_id: String,
    pub student_id: String,
    pub subject_id: String,
    pub school_id: String,
    pub academic_year: String,
    pub raw_marks: Option<i64>,
    pub standardized_marks: Option<i64>,
    pub marks: Option<i64>,
    pub grade: Option<String>,
    pub points: Option<i64>,
    #[serde(default)]
    pub class_level: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointsPolicy {
    /// Sum of every collected point value.
    Full,
    /// Sum of the N lowest (best) point values.
    BestOf(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DivisionRule {
    FromAverage,
    FromPoints,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregatePolicy {
    pub points: PointsPolicy,
    pub division: DivisionRule,
}

impl AggregatePolicy {
    /// Exam lists, class reports and rankings.
    pub const EXAM_VIEW: AggregatePolicy = AggregatePolicy {
        points: PointsPolicy::Full,
        division: DivisionRule::FromAverage,
    };

    pub fn report_card(best_of: usize) -> AggregatePolicy {
        AggregatePolicy {
            points: PointsPolicy::BestOf(best_of),
            division: DivisionRule::FromPoints,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentAggregate {
    pub student_id: String,
    pub total: Option<i64>,
    pub average: Option<f64>,
    pub points: Option<i64>,
    pub division: Option<String>,
    pub grade: Option<String>,
    pub position: Option<usize>,
    pub out_of: Option<usize>,
    pub subject_count: usize,
}

impl StudentAggregate {
    pub fn empty(student_id: &str) -> Self {
        Self {
            student_id: student_id.to_string(),
            total: None,
            average: None,
            points: None,
            division: None,
            grade: None,
            position: None,
            out_of: None,
            subject_count: 0,
        }
    }
}

fn sum_points(mut collected: Vec<i64>, policy: PointsPolicy) -> Option<i64> {
    if collected.is_empty() {
        return None;
    }
    match policy {
        PointsPolicy::Full => Some(collected.iter().sum()),
        PointsPolicy::BestOf(n) => {
            collected.sort_unstable();
            Some(collected.iter().take(n).sum())
        }
    }
}

/// Aggregates one student's marks. Rows without marks are ignored; a
/// student with no marks at all gets null total, average and division.
pub fn aggregate_student<'a, I>(
    student_id: &str,
    records: I,
    schemes: &[GradingScheme],
    policy: AggregatePolicy,
) -> StudentAggregate
where
    I: IntoIterator<Item = &'a MarkRecord>,
{
    let mut total: i64 = 0;
    let mut count: usize = 0;
    let mut collected: Vec<i64> = Vec::new();

    for r in records {
        let Some(mark) = r.marks else {
            continue;
        };
        total += mark;
        count += 1;
        if let Some(points) = resolve(Some(mark), schemes).and_then(|s| s.points) {
            collected.push(points);
        }
    }

    if count == 0 {
        return StudentAggregate::empty(student_id);
    }

    let average = round_2(total as f64 / count as f64);
    let points = sum_points(collected, policy.points);
    let division = match policy.division {
        DivisionRule::FromAverage => Some(division_label_for_average(average, schemes)),
        DivisionRule::FromPoints => points.map(|p| division_from_points(p).label().to_string()),
    };
    let grade = resolve(Some(round_to_int(average)), schemes).map(|s| s.grade.clone());

    StudentAggregate {
        student_id: student_id.to_string(),
        total: Some(total),
        average: Some(average),
        points,
        division,
        grade,
        position: None,
        out_of: None,
        subject_count: count,
    }
}

/// Groups `records` by key, keeping first-appearance order of keys and rows.
fn group_in_order<'a, K, F>(records: &'a [MarkRecord], key_fn: F) -> Vec<(K, Vec<&'a MarkRecord>)>
where
    K: Eq + std::hash::Hash + Clone,
    F: Fn(&MarkRecord) -> Option<K>,
{
    let mut index: HashMap<K, usize> = HashMap::new();
    let mut groups: Vec<(K, Vec<&'a MarkRecord>)> = Vec::new();
    for r in records {
        let Some(key) = key_fn(r) else {
            continue;
        };
        match index.get(&key) {
            Some(&i) => groups[i].1.push(r),
            None => {
                index.insert(key.clone(), groups.len());
                groups.push((key, vec![r]));
            }
        }
    }
    groups
}

/// One aggregate per student, in order of first appearance. Works for a
/// single exam or for every exam of an academic year.
pub fn aggregate_students(
    records: &[MarkRecord],
    schemes: &[GradingScheme],
    policy: AggregatePolicy,
) -> Vec<StudentAggregate> {
    group_in_order(records, |r| Some(r.student_id.clone()))
        .into_iter()
        .map(|(student_id, rows)| {
            aggregate_student(&student_id, rows.iter().copied(), schemes, policy)
        })
        .collect()
}

/// Orders by average desc then points asc (nulls last in both) and assigns
/// 1-based positions. Equal keys keep their input order.
pub fn rank(mut aggregates: Vec<StudentAggregate>) -> Vec<StudentAggregate> {
    aggregates.sort_by(|a, b| {
        cmp_desc_nulls_last(a.average, b.average)
            .then_with(|| cmp_asc_nulls_last(a.points, b.points))
    });
    let out_of = aggregates.len();
    for (i, a) in aggregates.iter_mut().enumerate() {
        a.position = Some(i + 1);
        a.out_of = Some(out_of);
    }
    aggregates
}

pub fn top_n(ranked: &[StudentAggregate], n: usize) -> Vec<StudentAggregate> {
    ranked.iter().take(n).cloned().collect()
}

/// Last `n` of a ranked list, worst first.
pub fn bottom_n(ranked: &[StudentAggregate], n: usize) -> Vec<StudentAggregate> {
    ranked.iter().rev().take(n).cloned().collect()
}

fn cmp_desc_nulls_last(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn cmp_asc_nulls_last(a: Option<i64>, b: Option<i64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DivisionCounts {
    #[serde(rename = "I")]
    pub one: usize,
    #[serde(rename = "II")]
    pub two: usize,
    #[serde(rename = "III")]
    pub three: usize,
    #[serde(rename = "IV")]
    pub four: usize,
    #[serde(rename = "0")]
    pub zero: usize,
}

impl DivisionCounts {
    pub fn add(&mut self, division: Division) {
        match division {
            Division::I => self.one += 1,
            Division::II => self.two += 1,
            Division::III => self.three += 1,
            Division::IV => self.four += 1,
            Division::Zero => self.zero += 1,
        }
    }

    pub fn get(&self, division: Division) -> usize {
        match division {
            Division::I => self.one,
            Division::II => self.two,
            Division::III => self.three,
            Division::IV => self.four,
            Division::Zero => self.zero,
        }
    }

    pub fn passed(&self) -> usize {
        Division::ALL
            .iter()
            .filter(|d| d.is_pass())
            .map(|d| self.get(*d))
            .sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupBy {
    ClassLevel,
    Subject,
    School,
    Exam,
}

impl GroupBy {
    pub fn key(self, r: &MarkRecord) -> Option<String> {
        match self {
            GroupBy::ClassLevel => r.class_level.clone(),
            GroupBy::Subject => Some(r.subject_id.clone()),
            GroupBy::School => Some(r.school_id.clone()),
            GroupBy::Exam => Some(r.exam_id.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupAggregate {
    pub key: String,
    pub candidates: usize,
    pub average_mark: Option<f64>,
    pub divisions: DivisionCounts,
    pub pass_rate: f64,
}

fn flat_average<'a, I>(rows: I) -> Option<f64>
where
    I: IntoIterator<Item = &'a &'a MarkRecord>,
{
    let (sum, count) = rows
        .into_iter()
        .filter_map(|r| r.marks)
        .fold((0_i64, 0_usize), |(s, c), m| (s + m, c + 1));
    if count == 0 {
        None
    } else {
        Some(round_2(sum as f64 / count as f64))
    }
}

/// Groups raw rows by `key_fn` (rows with no key are skipped) and returns
/// one aggregate per key, sorted by key.
pub fn aggregate_groups<F>(
    records: &[MarkRecord],
    key_fn: F,
    schemes: &[GradingScheme],
) -> Vec<GroupAggregate>
where
    F: Fn(&MarkRecord) -> Option<String>,
{
    let mut groups = group_in_order(records, key_fn);
    groups.sort_by(|a, b| a.0.cmp(&b.0));

    groups
        .into_iter()
        .map(|(key, rows)| {
            let mut per_student: Vec<(&str, Vec<&MarkRecord>)> = Vec::new();
            let mut student_index: HashMap<&str, usize> = HashMap::new();
            for r in rows.iter().copied() {
                match student_index.get(r.student_id.as_str()) {
                    Some(&i) => per_student[i].1.push(r),
                    None => {
                        student_index.insert(r.student_id.as_str(), per_student.len());
                        per_student.push((r.student_id.as_str(), vec![r]));
                    }
                }
            }

            let mut divisions = DivisionCounts::default();
            for (_, student_rows) in &per_student {
                let bucket = flat_average(student_rows.iter())
                    .map(|avg| division_bucket_for_average(avg, schemes))
                    .unwrap_or(Division::Zero);
                divisions.add(bucket);
            }

            let candidates = per_student.len();
            let pass_rate = if candidates == 0 {
                0.0
            } else {
                round_off_1_decimal(divisions.passed() as f64 / candidates as f64 * 100.0)
            };

            GroupAggregate {
                key,
                candidates,
                average_mark: flat_average(rows.iter()),
                divisions,
                pass_rate,
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectAggregate {
    pub subject_id: String,
    pub candidates: usize,
    pub sat: usize,
    pub pass: usize,
    pub fail: usize,
    pub average_mark: Option<f64>,
    pub gpa: Option<f64>,
    pub competency: Option<String>,
    pub grade_counts: BTreeMap<String, usize>,
}

/// Per-subject pass/fail, GPA and competency. Ungraded rows count towards
/// `sat` only, so `sat` can exceed `pass + fail`.
pub fn aggregate_subjects(records: &[MarkRecord], schemes: &[GradingScheme]) -> Vec<SubjectAggregate> {
    let mut groups = group_in_order(records, |r| Some(r.subject_id.clone()));
    groups.sort_by(|a, b| a.0.cmp(&b.0));

    groups
        .into_iter()
        .map(|(subject_id, rows)| {
            let mut pass = 0_usize;
            let mut fail = 0_usize;
            let mut collected: Vec<i64> = Vec::new();
            let mut grade_counts: BTreeMap<String, usize> = BTreeMap::new();

            for r in &rows {
                let Some(scheme) = resolve(r.marks, schemes) else {
                    continue;
                };
                if scheme.grade.eq_ignore_ascii_case("F") {
                    fail += 1;
                } else {
                    pass += 1;
                }
                *grade_counts.entry(scheme.grade.clone()).or_insert(0) += 1;
                if let Some(p) = scheme.points {
                    collected.push(p);
                }
            }

            let gpa = if collected.is_empty() {
                None
            } else {
                Some(round_2(
                    collected.iter().sum::<i64>() as f64 / collected.len() as f64,
                ))
            };
            let candidates = rows
                .iter()
                .map(|r| r.student_id.as_str())
                .collect::<HashSet<_>>()
                .len();

            SubjectAggregate {
                subject_id,
                candidates,
                sat: rows.len(),
                pass,
                fail,
                average_mark: flat_average(rows.iter()),
                gpa,
                competency: gpa.map(|g| competency_band(g).to_string()),
                grade_counts,
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportCardLine {
    pub subject_id: String,
    pub marks: Option<i64>,
    pub grade: Option<String>,
    pub points: Option<i64>,
    /// Whether this line's points are among the best N summed.
    pub counted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportCard {
    #[serde(flatten)]
    pub aggregate: StudentAggregate,
    pub average_display: Option<f64>,
    pub best_of: Option<usize>,
    pub lines: Vec<ReportCardLine>,
}

/// Single-student report card, normally best-N points with the
/// points-threshold division. Rows of other students are ignored.
pub fn report_card(
    student_id: &str,
    records: &[MarkRecord],
    schemes: &[GradingScheme],
    policy: AggregatePolicy,
) -> ReportCard {
    let own: Vec<&MarkRecord> = records.iter().filter(|r| r.student_id == student_id).collect();
    let aggregate = aggregate_student(student_id, own.iter().copied(), schemes, policy);
    let best_of = match policy.points {
        PointsPolicy::BestOf(n) => Some(n),
        PointsPolicy::Full => None,
    };

    let mut lines: Vec<ReportCardLine> = own
        .iter()
        .map(|r| {
            let scheme = resolve(r.marks, schemes);
            ReportCardLine {
                subject_id: r.subject_id.clone(),
                marks: r.marks,
                grade: scheme.map(|s| s.grade.clone()),
                points: scheme.and_then(|s| s.points),
                counted: false,
            }
        })
        .collect();

    let mut by_points: Vec<(usize, i64)> = lines
        .iter()
        .enumerate()
        .filter_map(|(i, l)| l.points.map(|p| (i, p)))
        .collect();
    by_points.sort_by_key(|(_, p)| *p);
    for (i, _) in by_points.into_iter().take(best_of.unwrap_or(usize::MAX)) {
        lines[i].counted = true;
    }

    ReportCard {
        average_display: aggregate.average.map(round_off_1_decimal),
        aggregate,
        best_of,
        lines,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendPoint {
    pub exam_id: String,
    #[serde(flatten)]
    pub aggregate: StudentAggregate,
}

/// One student's ranked aggregate per exam, in `exam_ids` order. `records`
/// hold every candidate in the ranking scope so positions are meaningful.
/// Exams the student did not sit are omitted.
pub fn student_trend(
    student_id: &str,
    records: &[MarkRecord],
    exam_ids: &[String],
    schemes: &[GradingScheme],
) -> Vec<TrendPoint> {
    let mut out = Vec::new();
    for exam_id in exam_ids {
        let exam_rows: Vec<MarkRecord> = records
            .iter()
            .filter(|r| &r.exam_id == exam_id)
            .cloned()
            .collect();
        let ranked = rank(aggregate_students(&exam_rows, schemes, AggregatePolicy::EXAM_VIEW));
        if let Some(agg) = ranked.into_iter().find(|a| a.student_id == student_id) {
            out.push(TrendPoint {
                exam_id: exam_id.clone(),
                aggregate: agg,
            });
        }
    }
    out
}
