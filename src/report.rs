//! Plain-text rendering of a [`Summary`].

use std::fmt::Write;

use crate::groups::GroupRef;
use crate::intune::{IntuneObjectSummary, MatchedVia, ObjectKind, Summary};

fn heading(kind: ObjectKind) -> &'static str {
    match kind {
        ObjectKind::App => "APPLICATIONS",
        ObjectKind::ConfigProfile => "CONFIGURATION PROFILES",
        ObjectKind::ManagedDevice => "MANAGED DEVICES",
        ObjectKind::ServiceConfig => "SERVICE CONFIGURATIONS",
    }
}

fn describe(object: &IntuneObjectSummary) -> String {
    let mut line = format!("- {} ({})", object.display_name, object.id);
    if let Some(intent) = &object.intent {
        let _ = write!(line, " [{}]", intent.to_uppercase());
    }
    let via = match &object.matched_via {
        MatchedVia::Direct => "directly assigned".to_string(),
        MatchedVia::Inherited(parent) => format!("via {}", parent.display_name),
        MatchedVia::AllDevices => "all devices".to_string(),
        MatchedVia::AllLicensedUsers => "all users".to_string(),
        MatchedVia::Membership => "member device".to_string(),
    };
    let _ = write!(line, " ({via})");
    if object.excluded {
        line.push_str(" [group excluded]");
    }
    line
}

fn write_groups(out: &mut String, title: &str, groups: &[GroupRef]) {
    let _ = writeln!(out, "=== {title} ===");
    if groups.is_empty() {
        out.push_str("None\n");
    }
    for g in groups {
        let _ = writeln!(out, "- {} ({})", g.display_name, g.id);
    }
}

/// Renders the whole report. Sections appear in [`ObjectKind`] order; an
/// empty section reads `None`, and every endpoint that could not be read
/// adds an `(unavailable: ...)` line after the objects that were found.
pub fn render(summary: &Summary) -> String {
    let group = &summary.group;
    let mut out = String::new();

    let _ = writeln!(out, "GROUP NAME:     {}", group.display_name);
    let _ = writeln!(out, "ID:             {}", group.id);
    let _ = writeln!(out, "MEMBER DEVICES: {}", group.member_device_ids.len());
    out.push('\n');

    write_groups(&mut out, "MEMBER OF", &group.parent_groups);
    out.push('\n');
    write_groups(&mut out, "MEMBERS", &group.member_groups);

    for kind in ObjectKind::ALL {
        let _ = writeln!(out, "\n=== {} ===", heading(kind));
        let mut any = false;
        for object in summary.objects_of(kind) {
            let _ = writeln!(out, "{}", describe(object));
            any = true;
        }
        for failure in summary.failures_of(kind) {
            let _ = writeln!(out, "(unavailable: {}: {})", failure.endpoint, failure.error);
            any = true;
        }
        if !any {
            out.push_str("None\n");
        }
    }

    out
}
