
use serde_json::json;
use test_support::{error_code, open_and_ingest, request, request_ok, spawn_sidecar, temp_dir};

fn triples(result: &serde_json::Value) -> Vec<(String, String, String)> {
    result
        .get("rows")
        .and_then(|v| v.as_array())
        .expect("rows")
        .iter()
        .map(|r| {
            (
                r.get("dept").and_then(|v| v.as_str()).unwrap_or("").into(),
                r.get("course").and_then(|v| v.as_str()).unwrap_or("").into(),
                r.get("section").and_then(|v| v.as_str()).unwrap_or("").into(),
            )
        })
        .collect()
}

fn cursor_from(result: &serde_json::Value, index: usize) -> serde_json::Value {
    let row = &result.get("rows").and_then(|v| v.as_array()).expect("rows")[index];
    json!({
        "dept": row.get("dept"),
        "course": row.get("course"),
        "section": row.get("section"),
    })
}

#[test]
fn forward_pages_cover_the_term_exactly_once() {
    let workspace = temp_dir("bookstored-keyset-fwd");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = open_and_ingest(&mut stdin, &mut reader, &workspace);

    let mut params = json!({ "term": "F", "year": "24", "limit": 2 });
    let mut seen = Vec::new();
    for i in 0..4 {
        let result = request_ok(
            &mut stdin,
            &mut reader,
            &format!("page-{i}"),
            "courses.page",
            params.clone(),
        );
        assert_eq!(result.get("total").and_then(|v| v.as_i64()), Some(5));
        let page = triples(&result);
        if page.is_empty() {
            break;
        }
        params = json!({
            "term": "F",
            "year": "24",
            "limit": 2,
            "cursor": cursor_from(&result, page.len() - 1),
        });
        seen.extend(page);
    }

    let expected: Vec<(String, String, String)> = [
        ("BIOL", "110", "001"),
        ("MATH", "005", "001"),
        ("MATH", "120", "001"),
        ("MATH", "120", "002"),
        ("STAT", "101", "001"),
    ]
    .iter()
    .map(|(d, c, s)| (d.to_string(), c.to_string(), s.to_string()))
    .collect();
    assert_eq!(seen, expected);

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn backward_page_reproduces_the_previous_page() {
    let workspace = temp_dir("bookstored-keyset-back");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = open_and_ingest(&mut stdin, &mut reader, &workspace);

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "courses.page",
        json!({ "term": "F", "year": "24", "limit": 2 }),
    );
    let second = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "courses.page",
        json!({
            "term": "F",
            "year": "24",
            "limit": 2,
            "cursor": cursor_from(&first, 1),
        }),
    );

    // Paging back from the head of page two lands on page one, already
    // in ascending order.
    let back = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "courses.page",
        json!({
            "term": "F",
            "year": "24",
            "limit": 2,
            "direction": "prev",
            "cursor": cursor_from(&second, 0),
        }),
    );
    assert_eq!(triples(&back), triples(&first));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn seek_matches_each_given_component_independently() {
    let workspace = temp_dir("bookstored-keyset-seek");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = open_and_ingest(&mut stdin, &mut reader, &workspace);

    let by_dept = request_ok(
        &mut stdin,
        &mut reader,
        "20",
        "courses.page",
        json!({
            "term": "F",
            "year": "24",
            "seek": true,
            "cursor": { "dept": "MATH" },
        }),
    );
    assert_eq!(
        triples(&by_dept),
        [
            ("MATH".to_string(), "005".to_string(), "001".to_string()),
            ("MATH".to_string(), "120".to_string(), "001".to_string()),
            ("MATH".to_string(), "120".to_string(), "002".to_string()),
            ("STAT".to_string(), "101".to_string(), "001".to_string()),
        ]
    );

    // A short course fragment is padded before comparing, so "12" reads
    // as "012" and still lands below 120.
    let by_course = request_ok(
        &mut stdin,
        &mut reader,
        "21",
        "courses.page",
        json!({
            "term": "F",
            "year": "24",
            "seek": true,
            "cursor": { "dept": "MATH", "course": "12" },
        }),
    );
    assert_eq!(
        triples(&by_course),
        [
            ("MATH".to_string(), "120".to_string(), "001".to_string()),
            ("MATH".to_string(), "120".to_string(), "002".to_string()),
            ("STAT".to_string(), "101".to_string(), "001".to_string()),
        ]
    );

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn adopted_flags_follow_the_adoption_rows() {
    let workspace = temp_dir("bookstored-keyset-adopted");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = open_and_ingest(&mut stdin, &mut reader, &workspace);

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "40",
        "courses.page",
        json!({ "term": "F", "year": "24" }),
    );
    let flags: Vec<(i64, String)> = result
        .get("rows")
        .and_then(|v| v.as_array())
        .expect("rows")
        .iter()
        .map(|r| {
            (
                r.get("id").and_then(|v| v.as_i64()).unwrap_or(0),
                r.get("adopted")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string(),
            )
        })
        .collect();

    // Course 105's adoption points at an unknown book; the repaired NULL
    // row still counts as an adoption. Only 103 ordered nothing.
    let expect = [
        (105, "Y"),
        (103, "N"),
        (101, "Y"),
        (102, "Y"),
        (104, "Y"),
    ];
    for (id, flag) in expect {
        let found = flags
            .iter()
            .find(|(i, _)| *i == id)
            .unwrap_or_else(|| panic!("course {id} missing"));
        assert_eq!(found.1, flag, "course {id}");
    }

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn partial_cursor_and_bad_direction_are_rejected() {
    let workspace = temp_dir("bookstored-keyset-bad");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = open_and_ingest(&mut stdin, &mut reader, &workspace);

    let partial = request(
        &mut stdin,
        &mut reader,
        "30",
        "courses.page",
        json!({
            "term": "F",
            "year": "24",
            "cursor": { "dept": "MATH" },
        }),
    );
    assert_eq!(error_code(&partial), "bad_params");

    let sideways = request(
        &mut stdin,
        &mut reader,
        "31",
        "courses.page",
        json!({
            "term": "F",
            "year": "24",
            "direction": "sideways",
        }),
    );
    assert_eq!(error_code(&sideways), "bad_params");

    drop(stdin);
    let _ = child.wait();
}
