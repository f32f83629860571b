//-
// Copyright (c) 2026, Mailfront Developers
//
// This file is part of Mailfront.
//
// Mailfront is free software: you can  redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Mailfront is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Mailfront. If not, see <http://www.gnu.org/licenses/>.

use super::defs::*;

/// The `ID` command by which a node announces it is proxying a session.
fn announce(node: &str, secret: Option<&str>) -> String {
    match secret {
        Some(secret) => format!(
            "ID (\"x-mailfront-proxy\" \"{}\" \
             \"x-mailfront-proxy-secret\" \"{}\")",
            node, secret
        ),
        None => format!("ID (\"x-mailfront-proxy\" \"{}\")", node),
    }
}

#[test]
fn selection_is_proxied_to_owner() {
    let setup = set_up_cluster();
    for subject in &["first", "second"] {
        setup
            .store
            .deliver("azure", "Archive", &[], &message(subject, "x"));
    }

    let mut client = setup.connect("proxy_front");
    quick_log_in(&mut client);

    let lines = quick_select(&mut client, "Archive");
    assert_completion(&lines, r"^OK \[READ-WRITE\] SELECT completed");
    assert_has_line(&lines, r"^\* 2 EXISTS$");

    let lines = ok_command(&mut client, "FETCH 1:* UID");
    assert_has_line(&lines, r"^\* 1 FETCH \(UID 1\)$");
    assert_has_line(&lines, r"^\* 2 FETCH \(UID 2\)$");

    let lines = ok_command(&mut client, "UID FETCH 1 BODY.PEEK[]");
    assert_has_line(
        &lines,
        r"(?s)^\* 1 FETCH \(UID 1 BODY\[\] \{[0-9]+\}\r\n.*Subject: first",
    );

    let lines = ok_command(&mut client, "STORE 1 +FLAGS (\\Seen)");
    assert_has_line(&lines, r"^\* 1 FETCH \(FLAGS \(\\Seen \\Recent\)\)$");

    // A session directly on the owning node changes the folder; the
    // proxied session hears about it through the backend.
    let mut direct = setup.connect_backend("proxy_direct");
    quick_log_in(&mut direct);
    let lines = append(&mut direct, "Archive", "", &message("third", "x"));
    assert_ok(&lines);
    poll_until(&mut client, r"^\* 3 EXISTS$");

    let lines = ok_command(&mut client, "SEARCH UNSEEN");
    assert_has_line(&lines, r"^\* SEARCH 2 3$");

    // Commands not about the selected folder are still served here
    let lines = ok_command(&mut client, "LIST \"\" Archive");
    assert_has_line(&lines, r#"^\* LIST \(\\HasNoChildren\) "/" Archive$"#);

    ok_command(&mut client, "CLOSE");
    let lines = client.command("FETCH 1 UID").unwrap();
    assert_completion(&lines, r"^BAD ");

    // The backend connection is reused for the next selection
    let lines = ok_command(&mut client, "EXAMINE Archive");
    assert_completion(&lines, r"^OK \[READ-ONLY\]");
    assert_has_line(&lines, r"^\* 3 EXISTS$");
    let lines = client.command("STORE 1 +FLAGS (\\Deleted)").unwrap();
    assert_completion(&lines, r"^NO \[READ-ONLY\]");

    let lines = ok_command(&mut client, "LOGOUT");
    assert_has_line(&lines, r"^\* BYE");
}

#[test]
fn unreachable_owner() {
    let setup = set_up_partitioned();
    setup
        .store
        .deliver("azure", "Archive", &[], &message("first", "x"));

    let mut client = setup.connect("proxy_partitioned");
    quick_log_in(&mut client);

    let lines = client.command("SELECT Archive").unwrap();
    assert_completion(&lines, r"^NO \[UNAVAILABLE\]");
    let lines = client.command("FETCH 1 UID").unwrap();
    assert_completion(&lines, r"^BAD ");

    // Listing only needs the store
    let lines = ok_command(&mut client, "LIST \"\" Archive");
    assert_has_line(&lines, r#"^\* LIST .* "/" Archive$"#);
}

#[test]
fn proxied_sessions_serve_locally() {
    let setup = set_up_partitioned();
    setup
        .store
        .deliver("azure", "Archive", &[], &message("first", "x"));

    // This is what a proxy sends before logging in. The receiving node
    // must not try to pass the session on again.
    let mut client = setup.connect("proxy_announced");
    skip_greeting(&mut client);
    ok_command(&mut client, &announce("a", Some(CLUSTER_SECRET)));
    ok_command(&mut client, "LOGIN azure hunter2");

    let lines = quick_select(&mut client, "Archive");
    assert_has_line(&lines, r"^\* 1 EXISTS$");
    let lines = ok_command(&mut client, "FETCH 1 UID");
    assert_has_line(&lines, r"^\* 1 FETCH \(UID 1\)$");
}

#[test]
fn proxy_announcement_needs_secret() {
    let setup = set_up_partitioned();
    setup
        .store
        .deliver("azure", "Archive", &[], &message("first", "x"));

    for (name, secret) in &[
        ("proxy_no_secret", None),
        ("proxy_wrong_secret", Some("guess")),
        ("proxy_empty_secret", Some("")),
    ] {
        // An ordinary client claiming to be a proxy is still routed to the
        // owner, which here cannot be reached.
        let mut client = setup.connect(*name);
        skip_greeting(&mut client);
        ok_command(&mut client, &announce("a", *secret));
        ok_command(&mut client, "LOGIN azure hunter2");

        let lines = client.command("SELECT Archive").unwrap();
        assert_completion(&lines, r"^NO \[UNAVAILABLE\]");
    }
}

#[test]
fn late_proxy_announcement_ignored() {
    let setup = set_up_partitioned();

    let mut client = setup.connect("proxy_late_id");
    quick_log_in(&mut client);
    ok_command(&mut client, &announce("a", Some(CLUSTER_SECRET)));

    let lines = client.command("SELECT Archive").unwrap();
    assert_completion(&lines, r"^NO \[UNAVAILABLE\]");
}

#[test]
fn copy_to_other_node_refused() {
    let setup = set_up_split();
    setup
        .store
        .deliver("azure", "INBOX", &[], &message("first", "x"));

    let mut client = setup.connect("proxy_split_copy");
    quick_log_in(&mut client);
    let lines = quick_select(&mut client, "INBOX");
    assert_has_line(&lines, r"^\* 1 EXISTS$");

    let lines = client.command("COPY 1 /home/cyan/Shared").unwrap();
    assert_completion(&lines, r"^NO \[CANNOT\] .*node b");

    // Same-node copies are unaffected
    ok_command(&mut client, "COPY 1 Archive");
    let lines = ok_command(&mut client, "STATUS Archive (MESSAGES)");
    assert_has_line(&lines, r"^\* STATUS Archive \(MESSAGES 1\)$");
}
