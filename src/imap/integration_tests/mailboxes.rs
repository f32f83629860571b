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
fn create_list_delete() {
    let setup = set_up();
    let mut client = setup.connect("mailboxes_create");
    quick_log_in(&mut client);

    ok_command(&mut client, "CREATE Projects/2026");
    ok_command(&mut client, "CREATE \"Lost &- Found\"");

    let lines = ok_command(&mut client, "LIST \"\" *");
    assert_has_line(&lines, r#"^\* LIST \(\\HasNoChildren\) "/" INBOX$"#);
    assert_has_line(&lines, r#"^\* LIST \(\\HasNoChildren\) "/" Archive$"#);
    assert_has_line(&lines, r#"^\* LIST \(\\HasChildren\) "/" Projects$"#);
    assert_has_line(
        &lines,
        r#"^\* LIST \(\\HasNoChildren\) "/" Projects/2026$"#,
    );
    assert_has_line(&lines, r#"^\* LIST .* "Lost &- Found"$"#);
    assert_has_line(
        &lines,
        r#"^\* LIST \(\\HasNoChildren\) "/" /home/cyan/Shared$"#,
    );

    // Other users' folders are all under /home
    let lines = ok_command(&mut client, "LIST \"\" %");
    assert_has_line(&lines, r#"^\* LIST \(\\HasChildren\) "/" Projects$"#);
    assert_no_line(&lines, "home");
    assert_no_line(&lines, "2026");

    let lines = ok_command(&mut client, "LIST Projects %");
    assert_eq!(2, lines.len());
    assert_has_line(&lines, "Projects/2026");

    let lines = ok_command(&mut client, "LIST \"\" \"\"");
    assert_has_line(&lines, r#"^\* LIST \(\\Noselect\) "/" ""$"#);

    let lines = client.command("CREATE Projects").unwrap();
    assert_completion(&lines, r"^NO \[ALREADYEXISTS\]");
    let lines = client.command("CREATE Foo*").unwrap();
    assert_completion(&lines, r"^NO \[CANNOT\]");

    let lines = client.command("DELETE INBOX").unwrap();
    assert_completion(&lines, r"^NO \[CANNOT\]");
    let lines = client.command("DELETE Nonesuch").unwrap();
    assert_completion(&lines, r"^NO \[NONEXISTENT\]");

    // A folder with children becomes a placeholder
    ok_command(&mut client, "DELETE Projects");
    let lines = ok_command(&mut client, "LIST \"\" Projects");
    assert_has_line(
        &lines,
        r#"^\* LIST \(\\Noselect \\HasChildren\) "/" Projects$"#,
    );
    let lines = client.command("DELETE Projects").unwrap();
    assert_completion(&lines, r"^NO \[INUSE\]");
    let lines = client.command("SELECT Projects").unwrap();
    assert_completion(&lines, r"^NO ");

    ok_command(&mut client, "DELETE Projects/2026");
    let lines = ok_command(&mut client, "LIST \"\" Projects/%");
    assert_eq!(1, lines.len());
}

#[test]
fn subscriptions() {
    let setup = set_up();
    let mut client = setup.connect("mailboxes_subscriptions");
    quick_log_in(&mut client);

    ok_command(&mut client, "SUBSCRIBE Archive");
    ok_command(&mut client, "SUBSCRIBE Archive");
    ok_command(&mut client, "SUBSCRIBE /home/cyan/Shared");
    let lines = ok_command(&mut client, "LSUB \"\" *");
    assert_has_line(&lines, r#"^\* LSUB \(\) "/" Archive$"#);
    assert_has_line(&lines, r#"^\* LSUB \(\) "/" /home/cyan/Shared$"#);
    assert_eq!(3, lines.len());

    // Subscriptions outlive the folder
    ok_command(&mut client, "DELETE Archive");
    let lines = ok_command(&mut client, "LSUB \"\" A%");
    assert_has_line(&lines, r#"^\* LSUB \(\\Noselect\) "/" Archive$"#);

    ok_command(&mut client, "UNSUBSCRIBE Archive");
    let lines = ok_command(&mut client, "LSUB \"\" *");
    assert_eq!(2, lines.len());
    assert_no_line(&lines, "Archive");
}

#[test]
fn shared_folders() {
    let setup = set_up();
    setup
        .store
        .deliver("cyan", "Shared", &[], &message("hello", "from cyan"));
    let mut client = setup.connect("mailboxes_shared");
    quick_log_in(&mut client);

    let lines = ok_command(&mut client, "LIST \"\" /home/*");
    assert_has_line(
        &lines,
        r#"^\* LIST \(\\HasNoChildren\) "/" /home/cyan/Shared$"#,
    );
    assert_has_line(
        &lines,
        r#"^\* LIST \(\\Noselect \\HasChildren\) "/" /home/cyan$"#,
    );
    assert_no_line(&lines, "Private");

    let lines = client.command("SELECT /home/cyan/Private").unwrap();
    assert_completion(&lines, r"^NO ");

    // Storing \Seen is the only change allowed, but that is enough for the
    // selection to be read-write.
    let lines = quick_select(&mut client, "/home/cyan/Shared");
    assert_completion(&lines, r"^OK \[READ-WRITE\]");
    assert_has_line(&lines, r"^\* 1 EXISTS$");
    ok_command(&mut client, "STORE 1 +FLAGS (\\Seen)");
    let lines = client.command("STORE 1 +FLAGS (\\Flagged)").unwrap();
    assert_completion(&lines, r"^NO \[NOPERM\]");
    let lines = client.command("EXPUNGE").unwrap();
    assert_completion(&lines, r"^NO \[NOPERM\]");

    let lines = client.command("CREATE /home/cyan/Shared/Sub").unwrap();
    assert_completion(&lines, r"^NO \[NOPERM\]");
    let lines = append(&mut client, "/home/cyan/Shared", "", b"x");
    assert_completion(&lines, r"^NO \[NOPERM\]");
}

#[test]
fn status_and_append() {
    let setup = set_up();
    let mut client = setup.connect("mailboxes_status");
    quick_log_in(&mut client);

    let lines = append(
        &mut client,
        "Archive",
        "(\\Seen $Important) \"14-Jul-2020 02:44:25 -0700\" ",
        &message("one", "first"),
    );
    assert_ok(&lines);
    let lines = append(&mut client, "Archive", "", &message("two", "second"));
    assert_ok(&lines);

    let lines = ok_command(
        &mut client,
        "STATUS Archive (MESSAGES RECENT UIDNEXT UNSEEN)",
    );
    assert_has_line(
        &lines,
        r"^\* STATUS Archive \(MESSAGES 2 RECENT 2 UIDNEXT 3 UNSEEN 1\)$",
    );

    let lines = append(&mut client, "Nonesuch", "", b"x");
    assert_completion(&lines, r"^NO \[TRYCREATE\]");
    let lines = append(&mut client, "Archive", "(\\Bogus) ", b"x");
    assert_completion(&lines, r"^BAD ");
    let lines = append(&mut client, "Archive", "\"yesterday\" ", b"x");
    assert_completion(&lines, r"^BAD ");

    let lines = client.command("STATUS Nonesuch (MESSAGES)").unwrap();
    assert_completion(&lines, r"^NO \[NONEXISTENT\]");
    let lines = client.command("STATUS Archive (SIZE)").unwrap();
    assert_completion(&lines, r"^BAD ");

    // SELECT claims the recent messages
    let lines = quick_select(&mut client, "Archive");
    assert_has_line(&lines, r"^\* 2 EXISTS$");
    assert_has_line(&lines, r"^\* 2 RECENT$");
    assert_has_line(&lines, r"^\* OK \[UNSEEN 2\]");
    assert_has_line(&lines, r"^\* OK \[UIDNEXT 3\]");
    assert_has_line(&lines, r"^\* FLAGS \(.*\$Important\)$");
    assert_has_line(&lines, r"^\* OK \[PERMANENTFLAGS \(.*\\\*\)\]$");
    assert_completion(&lines, r"^OK \[READ-WRITE\]");
    let lines = ok_command(&mut client, "UID FETCH 1 INTERNALDATE");
    assert_has_line(&lines, r#"INTERNALDATE "14-Jul-2020 02:44:25 -0700""#);
    ok_command(&mut client, "CLOSE");

    let lines = ok_command(&mut client, "STATUS Archive (RECENT)");
    assert_has_line(&lines, r"\(RECENT 0\)");
}
