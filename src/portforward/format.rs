// Text rendering for tool responses.

use std::time::Duration;

use super::registry::Session;

/// Returned by `list` when nothing is forwarding.
pub const NO_SESSIONS: &str = "No active port forwarding sessions found.";

const HEADERS: [&str; 6] = [
    "NAMESPACE",
    "RESOURCE",
    "KIND",
    "LOCAL PORTS",
    "REMOTE PORTS",
    "AGE",
];

/// Column gap, matching kubectl's tabwriter padding.
const PADDING: usize = 3;

/// Compact age: `Nd`, `NhNm`, `NmNs` or `Ns`.
pub fn format_age(age: Duration) -> String {
    let secs = age.as_secs();
    if secs >= 86_400 {
        format!("{}d", secs / 86_400)
    } else if secs >= 3_600 {
        format!("{}h{}m", secs / 3_600, (secs % 3_600) / 60)
    } else if secs >= 60 {
        format!("{}m{}s", secs / 60, secs % 60)
    } else {
        format!("{secs}s")
    }
}

/// Render sessions as an aligned table, or [`NO_SESSIONS`] when empty.
pub fn render_sessions(sessions: &[Session]) -> String {
    if sessions.is_empty() {
        return NO_SESSIONS.to_string();
    }

    let rows: Vec<[String; 6]> = sessions
        .iter()
        .map(|s| {
            [
                s.namespace.clone(),
                s.resource_name.clone(),
                s.kind.clone(),
                s.local_ports.join(","),
                s.remote_ports.join(","),
                format_age(s.age()),
            ]
        })
        .collect();

    let mut widths = HEADERS.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }

    let mut out = String::new();
    push_row(&mut out, &HEADERS, &widths);
    for row in &rows {
        let cells: Vec<&str> = row.iter().map(String::as_str).collect();
        push_row(&mut out, &cells, &widths);
    }
    out.truncate(out.trim_end().len());
    out
}

fn push_row(out: &mut String, cells: &[&str], widths: &[usize]) {
    let last = cells.len() - 1;
    for (i, (cell, width)) in cells.iter().zip(widths).enumerate() {
        if i == last {
            out.push_str(cell);
        } else {
            out.push_str(&format!("{cell:<pad$}", pad = width + PADDING));
        }
    }
    out.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portforward::registry::SessionKey;
    use crate::portforward::PortPair;

    #[test]
    fn age_formats() {
        assert_eq!(format_age(Duration::from_secs(0)), "0s");
        assert_eq!(format_age(Duration::from_secs(59)), "59s");
        assert_eq!(format_age(Duration::from_secs(60)), "1m0s");
        assert_eq!(format_age(Duration::from_secs(125)), "2m5s");
        assert_eq!(format_age(Duration::from_secs(3_600)), "1h0m");
        assert_eq!(format_age(Duration::from_secs(3_600 * 5 + 60 * 7 + 30)), "5h7m");
        assert_eq!(format_age(Duration::from_secs(86_400)), "1d");
        assert_eq!(format_age(Duration::from_secs(86_400 * 3 + 7_200)), "3d");
    }

    #[test]
    fn empty_list_message() {
        assert_eq!(render_sessions(&[]), NO_SESSIONS);
    }

    #[test]
    fn table_has_header_and_one_row_per_session() {
        let sessions = vec![
            Session::new(&SessionKey::new("default", "web"), "Pod", &[PortPair::new(8080, 80)]),
            Session::new(
                &SessionKey::new("monitoring", "grafana"),
                "Deployment",
                &[PortPair::new(3000, 3000), PortPair::new(9090, 90)],
            ),
        ];
        let table = render_sessions(&sessions);
        let lines: Vec<&str> = table.lines().collect();

        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("NAMESPACE"));
        assert!(lines[0].ends_with("AGE"));
        assert!(lines[1].starts_with("default "));
        assert!(lines[2].contains("3000,9090"));
        assert!(lines[2].contains("3000,90"));
        assert!(lines[2].ends_with('s'));

        // Columns line up under their headers.
        let kind_col = lines[0].find("KIND").unwrap();
        assert_eq!(&lines[1][kind_col..kind_col + 3], "Pod");
        assert_eq!(&lines[2][kind_col..kind_col + 10], "Deployment");
    }
}
