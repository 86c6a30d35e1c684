use std::collections::HashMap;

use anyhow::{Context, Result};

use crate::decision::split_full_term;
use crate::error::EnrollmentError;
use crate::store::SectionRef;

const REQUIRED_REPORT_FIELDS: [&str; 7] = [
    "COURSE REFERENCE NUMBER",
    "CAMPUS",
    "SUBJECT",
    "COURSE NUMBER",
    "MAXIMUM ENROLLMENT",
    "ACTUAL ENROLLMENT",
    "TITLE",
];

const CSV_COLUMNS: [&str; 17] = [
    "UnitNumber",
    "Term",
    "Year",
    "DepartmentName",
    "CourseNumber",
    "SectionNumber",
    "ProfessorName",
    "MaximumCapacity",
    "EstPreEnrollment",
    "ActualEnrollment",
    "ContinuationClass",
    "EveningClass",
    "ExtensionClass",
    "TextnetFlag",
    "Location",
    "CourseTitle",
    "CourseID",
];

/// One registrar row matched against the current catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedCourse {
    pub campus: String,
    pub dept: String,
    pub course: String,
    pub section: String,
    pub prof: String,
    pub max_enrl: String,
    pub act_enrl: String,
    pub title: String,
    pub crn: String,
}

#[derive(Debug)]
pub struct MatchOutcome {
    pub matched: Vec<MatchedCourse>,
    pub skipped: usize,
}

fn field<'a>(row: &'a HashMap<String, String>, name: &str) -> &'a str {
    row.get(name).map(String::as_str).unwrap_or("").trim()
}

/// Matches a registrar enrollment report against the current catalog.
///
/// The report must carry every required column. Cancelled sections are
/// skipped. The offering number comes from the report when present,
/// else from the catalog by CRN, else "0"; instructors are uppercased
/// with "TBD" standing in for a blank.
pub fn match_report(
    headers: &[String],
    rows: &[HashMap<String, String>],
    sections: &[SectionRef],
) -> Result<MatchOutcome, EnrollmentError> {
    for required in REQUIRED_REPORT_FIELDS {
        if !headers.iter().any(|h| h == required) {
            return Err(EnrollmentError::MissingField(required.to_string()));
        }
    }

    let mut matched = Vec::new();
    let mut skipped = 0usize;
    for row in rows {
        if field(row, "TITLE") == "CANCELLED" {
            skipped += 1;
            continue;
        }

        let crn = field(row, "COURSE REFERENCE NUMBER").to_string();
        let offering = field(row, "OFFERING NUMBER");
        let section = if !offering.is_empty() {
            offering.to_string()
        } else {
            sections
                .iter()
                .find(|s| s.crn.as_deref() == Some(crn.as_str()))
                .map(|s| s.section.clone())
                .unwrap_or_else(|| "0".to_string())
        };

        let prof = field(row, "PRIMARY INSTRUCTOR LAST NAME");
        let prof = if prof.is_empty() {
            "TBD".to_string()
        } else {
            prof.to_uppercase()
        };

        matched.push(MatchedCourse {
            campus: field(row, "CAMPUS").to_string(),
            dept: field(row, "SUBJECT").to_string(),
            course: field(row, "COURSE NUMBER").to_string(),
            section,
            prof,
            max_enrl: field(row, "MAXIMUM ENROLLMENT").to_string(),
            act_enrl: field(row, "ACTUAL ENROLLMENT").to_string(),
            title: field(row, "TITLE").to_string(),
            crn,
        });
    }

    if matched.is_empty() {
        return Err(EnrollmentError::Empty);
    }
    Ok(MatchOutcome { matched, skipped })
}

fn pad3(value: &str) -> String {
    format!("{value:0>3}")
}

/// Renders matched courses as a course feed the store system accepts.
/// The estimated pre-enrollment column mirrors the maximum capacity;
/// nobody has a better figure at formatting time.
pub fn format_courses(matched: &[MatchedCourse], term: &str, year: &str) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(Vec::new());
    wtr.write_record(CSV_COLUMNS)
        .context("failed to render course csv")?;
    for course in matched {
        let unit = if course.campus == "MPC" { "1" } else { "2" };
        let section = pad3(&course.section);
        wtr.write_record([
            unit,
            term,
            year,
            course.dept.as_str(),
            course.course.as_str(),
            section.as_str(),
            course.prof.as_str(),
            course.max_enrl.as_str(),
            course.max_enrl.as_str(),
            course.act_enrl.as_str(),
            "",
            "",
            "",
            "",
            "",
            course.title.as_str(),
            course.crn.as_str(),
        ])
        .context("failed to render course csv")?;
    }
    let bytes = wtr
        .into_inner()
        .context("failed to render course csv")?;
    String::from_utf8(bytes).context("rendered csv was not utf-8")
}

pub fn formatted_file_name(stem: &str) -> String {
    format!("{stem}_Formatted.csv")
}

/// Pulls a full term code out of a report file name, e.g. "F24
/// Enrollment" or "enrollment_W25".
pub fn term_from_file_name(stem: &str) -> Option<(String, String)> {
    stem.split(|c: char| !c.is_ascii_alphanumeric())
        .find_map(|token| split_full_term(token).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers() -> Vec<String> {
        let mut h: Vec<String> = REQUIRED_REPORT_FIELDS
            .iter()
            .map(|s| s.to_string())
            .collect();
        h.push("OFFERING NUMBER".to_string());
        h.push("PRIMARY INSTRUCTOR LAST NAME".to_string());
        h
    }

    fn report_row(
        crn: &str,
        offering: &str,
        prof: &str,
        title: &str,
    ) -> HashMap<String, String> {
        let mut row = HashMap::new();
        row.insert("COURSE REFERENCE NUMBER".into(), crn.into());
        row.insert("CAMPUS".into(), "MPC".into());
        row.insert("SUBJECT".into(), "MATH".into());
        row.insert("COURSE NUMBER".into(), "101".into());
        row.insert("MAXIMUM ENROLLMENT".into(), "40".into());
        row.insert("ACTUAL ENROLLMENT".into(), "35".into());
        row.insert("TITLE".into(), title.into());
        row.insert("OFFERING NUMBER".into(), offering.into());
        row.insert("PRIMARY INSTRUCTOR LAST NAME".into(), prof.into());
        row
    }

    fn catalog() -> Vec<SectionRef> {
        vec![SectionRef {
            section: "002".into(),
            crn: Some("30013".into()),
        }]
    }

    #[test]
    fn missing_report_columns_fail_the_whole_file() {
        let mut headers = headers();
        headers.retain(|h| h != "CAMPUS");
        let err = match_report(&headers, &[], &catalog()).unwrap_err();
        assert!(matches!(err, EnrollmentError::MissingField(f) if f == "CAMPUS"));
    }

    #[test]
    fn cancelled_sections_are_skipped_and_counted() {
        let rows = vec![
            report_row("30012", "1", "Ng", "Calc I"),
            report_row("30099", "2", "Wu", "CANCELLED"),
        ];
        let outcome = match_report(&headers(), &rows, &catalog()).unwrap();
        assert_eq!(outcome.matched.len(), 1);
        assert_eq!(outcome.skipped, 1);
    }

    #[test]
    fn offering_number_wins_over_the_catalog_lookup() {
        let rows = vec![report_row("30013", "7", "Ng", "Calc I")];
        let outcome = match_report(&headers(), &rows, &catalog()).unwrap();
        assert_eq!(outcome.matched[0].section, "7");
    }

    #[test]
    fn blank_offering_numbers_fall_back_to_crn_then_zero() {
        let rows = vec![
            report_row("30013", "", "Ng", "Calc I"),
            report_row("99999", "", "Wu", "Calc II"),
        ];
        let outcome = match_report(&headers(), &rows, &catalog()).unwrap();
        assert_eq!(outcome.matched[0].section, "002");
        assert_eq!(outcome.matched[1].section, "0");
    }

    #[test]
    fn instructors_are_uppercased_with_a_tbd_fallback() {
        let rows = vec![
            report_row("30012", "1", "de la Cruz", "Calc I"),
            report_row("30013", "2", "", "Calc II"),
        ];
        let outcome = match_report(&headers(), &rows, &catalog()).unwrap();
        assert_eq!(outcome.matched[0].prof, "DE LA CRUZ");
        assert_eq!(outcome.matched[1].prof, "TBD");
    }

    #[test]
    fn a_report_with_no_usable_rows_is_rejected() {
        let rows = vec![report_row("30099", "2", "Wu", "CANCELLED")];
        assert!(matches!(
            match_report(&headers(), &rows, &catalog()),
            Err(EnrollmentError::Empty)
        ));
    }

    #[test]
    fn formatted_csv_pads_sections_and_maps_campuses() {
        let mut off_campus = report_row("30014", "1", "Diaz", "Mechanics");
        off_campus.insert("CAMPUS".into(), "ONLINE".into());
        let rows = vec![report_row("30012", "1", "Ng", "Calc I"), off_campus];
        let outcome = match_report(&headers(), &rows, &catalog()).unwrap();
        let csv = format_courses(&outcome.matched, "F", "24").unwrap();

        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("UnitNumber,Term,Year,DepartmentName"));
        assert_eq!(
            lines[1],
            "1,F,24,MATH,101,001,NG,40,40,35,,,,,,Calc I,30012"
        );
        assert!(lines[2].starts_with("2,F,24,"));
    }

    #[test]
    fn term_codes_are_recovered_from_file_names() {
        assert_eq!(
            term_from_file_name("F24 Enrollment"),
            Some(("F".into(), "24".into()))
        );
        assert_eq!(
            term_from_file_name("enrollment_W25"),
            Some(("W".into(), "25".into()))
        );
        assert_eq!(term_from_file_name("enrollment"), None);
    }
}
