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

#[test]
fn greeting_and_capability() {
    let setup = set_up();
    let mut client = setup.connect("basics_greeting");

    let greeting = String::from_utf8(client.read_response().unwrap()).unwrap();
    assert!(
        regex::Regex::new(
            r"^\* OK \[CAPABILITY IMAP4rev1 [A-Z0-9+ ]*\] mailfront [0-9.]+ ready$"
        )
        .unwrap()
        .is_match(&greeting),
        "Bad greeting: {:?}",
        greeting
    );

    let lines = ok_command(&mut client, "CAPABILITY");
    assert_has_line(&lines, r"^\* CAPABILITY IMAP4rev1 .*LITERAL\+");
    assert_has_line(&lines, r"^\* CAPABILITY .*UNSELECT");

    let lines = ok_command(&mut client, "NOOP");
    assert_eq!(1, lines.len());
}

#[test]
fn login_and_logout() {
    let setup = set_up();
    let mut client = setup.connect("basics_login");
    skip_greeting(&mut client);

    let lines = client.command("SELECT INBOX").unwrap();
    assert_completion(&lines, r"^BAD .*Not logged in");

    let lines = client.command("LOGIN azure hunter3").unwrap();
    assert_completion(
        &lines,
        r"^NO \[AUTHENTICATIONFAILED\] LOGIN failed: Bad user id or password$",
    );

    let lines = client.command("LOGIN nobody hunter2").unwrap();
    assert_completion(&lines, r"^NO \[AUTHENTICATIONFAILED\]");

    // User names are case-insensitive
    let lines = ok_command(&mut client, "LOGIN AZURE hunter2");
    assert_completion(&lines, r"^OK \[CAPABILITY IMAP4rev1 .*\] User login$");

    let lines = client.command("LOGIN azure hunter2").unwrap();
    assert_completion(&lines, r"^BAD \[CLIENTBUG\] .*Already logged in");

    let lines = ok_command(&mut client, "LOGOUT");
    assert_has_line(&lines, r"^\* BYE ");

    // The server is gone now
    assert!(client.read_response().is_err());
}

#[test]
fn malformed_commands() {
    let setup = set_up();
    let mut client = setup.connect("basics_malformed");
    quick_log_in(&mut client);

    let lines = client.command("FROBNICATE").unwrap();
    assert_completion(&lines, r"^BAD .*Unknown command");

    let lines = client.command("SELECT").unwrap();
    assert_completion(&lines, r"^BAD \[PARSE\]");

    let lines = client.command("SELECT \"INBOX").unwrap();
    assert_completion(&lines, r"^BAD \[PARSE\]");

    let lines = client.command("FETCH 1 FLAGS").unwrap();
    assert_completion(&lines, r"^BAD .*No mailbox selected");

    // The session carries on as usual afterwards
    ok_command(&mut client, "NOOP");
}

#[test]
fn id_and_namespace() {
    let setup = set_up();
    let mut client = setup.connect("basics_id");
    skip_greeting(&mut client);

    let lines = ok_command(&mut client, "ID (\"name\" \"tester\" \"os\" NIL)");
    assert_has_line(
        &lines,
        r#"^\* ID \("name" "mailfront" "version" "[0-9.]+" "support-url" "mailto:help@example.com"\)$"#,
    );

    ok_command(&mut client, "ID NIL");
    let lines = client.command("ID (\"name\")").unwrap();
    assert_completion(&lines, r"^BAD \[PARSE\]");

    let lines = client.command("NAMESPACE").unwrap();
    assert_completion(&lines, r"^BAD .*Not logged in");

    ok_command(&mut client, "LOGIN azure hunter2");
    let lines = ok_command(&mut client, "NAMESPACE");
    assert_has_line(
        &lines,
        r#"^\* NAMESPACE \(\("" "/"\)\) \(\("/home/" "/"\)\) NIL$"#,
    );
}
