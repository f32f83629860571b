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
use crate::account::model::Flag;

fn deliver_three(setup: &Setup) {
    setup.store.deliver(
        "azure",
        "Archive",
        &[Flag::Seen],
        &message("first", "one"),
    );
    setup
        .store
        .deliver("azure", "Archive", &[], &message("second", "two"));
    setup
        .store
        .deliver("azure", "Archive", &[], &message("third", "three"));
}

#[test]
fn fetch_attributes() {
    let setup = set_up();
    deliver_three(&setup);
    let mut client = setup.connect("messages_fetch");
    quick_log_in(&mut client);

    let lines = quick_select(&mut client, "Archive");
    assert_has_line(&lines, r"^\* 3 EXISTS$");
    assert_has_line(&lines, r"^\* 3 RECENT$");
    assert_has_line(&lines, r"^\* OK \[UNSEEN 2\]$");
    assert_has_line(&lines, r"^\* OK \[UIDNEXT 4\]$");

    let lines = ok_command(&mut client, "FETCH 1:* FLAGS");
    assert_eq!(4, lines.len());
    assert_has_line(&lines, r"^\* 1 FETCH \(FLAGS \(\\Seen \\Recent\)\)$");
    assert_has_line(&lines, r"^\* 3 FETCH \(FLAGS \(\\Recent\)\)$");

    let lines = ok_command(&mut client, "UID FETCH 2 (RFC822.SIZE)");
    let expected = format!(
        r"^\* 2 FETCH \(UID 2 RFC822.SIZE {}\)$",
        message("second", "two").len()
    );
    assert_has_line(&lines, &expected);

    let lines = ok_command(&mut client, "FETCH 2 FAST");
    assert_has_line(
        &lines,
        r#"^\* 2 FETCH \(FLAGS \(\\Recent\) INTERNALDATE "13-Sep-2020 12:26:40 \+0000" RFC822.SIZE [0-9]+\)$"#,
    );

    // PEEK leaves \Seen alone
    let lines = ok_command(&mut client, "FETCH 2 BODY.PEEK[]");
    assert_has_line(&lines, r"(?s)^\* 2 FETCH \(BODY\[\] \{[0-9]+\}\r\n.*two");
    let lines = ok_command(&mut client, "FETCH 2 FLAGS");
    assert_has_line(&lines, r"^\* 2 FETCH \(FLAGS \(\\Recent\)\)$");

    // A plain BODY[] sets it and reports the new flags alongside
    let lines = ok_command(&mut client, "FETCH 2 BODY[]");
    assert_has_line(
        &lines,
        r"(?s)^\* 2 FETCH \(FLAGS \(\\Seen \\Recent\) BODY\[\] \{[0-9]+\}\r\n.*Subject: second",
    );
    let lines = ok_command(&mut client, "FETCH 2 FLAGS");
    assert_has_line(&lines, r"^\* 2 FETCH \(FLAGS \(\\Seen \\Recent\)\)$");

    let lines = client.command("FETCH 4 FLAGS").unwrap();
    assert_completion(&lines, r"^BAD ");
    let lines = client.command("FETCH 1 (FLAGS BODY[HEADER])").unwrap();
    assert_completion(&lines, r"^BAD ");
    let lines = client.command("FETCH 1 ()").unwrap();
    assert_completion(&lines, r"^BAD ");

    // A UID that doesn't exist is silently skipped
    let lines = ok_command(&mut client, "UID FETCH 2:99 UID");
    assert_eq!(3, lines.len());
}

#[test]
fn store_flags() {
    let setup = set_up();
    deliver_three(&setup);
    let mut client = setup.connect("messages_store");
    quick_log_in(&mut client);
    quick_select(&mut client, "Archive");

    let lines = ok_command(&mut client, "STORE 2:3 +FLAGS (\\Flagged)");
    assert_has_line(
        &lines,
        r"^\* 2 FETCH \(FLAGS \(\\Flagged \\Recent\)\)$",
    );
    assert_has_line(
        &lines,
        r"^\* 3 FETCH \(FLAGS \(\\Flagged \\Recent\)\)$",
    );

    let lines = ok_command(&mut client, "STORE 1 +FLAGS.SILENT (\\Answered)");
    assert_eq!(1, lines.len());

    let lines = ok_command(&mut client, "UID STORE 1 FLAGS (\\Draft)");
    assert_has_line(
        &lines,
        r"^\* 1 FETCH \(UID 1 FLAGS \(\\Draft \\Recent\)\)$",
    );

    let lines = ok_command(&mut client, "STORE 3 -FLAGS (\\Flagged)");
    assert_has_line(&lines, r"^\* 3 FETCH \(FLAGS \(\\Recent\)\)$");

    let lines = client.command("STORE 1 FROB (\\Seen)").unwrap();
    assert_completion(&lines, r"^BAD ");
    let lines = client.command("STORE 1 +FLAGS (\\Recent)").unwrap();
    assert_completion(&lines, r"^BAD ");
    let lines = client.command("STORE 9 +FLAGS (\\Seen)").unwrap();
    assert_completion(&lines, r"^BAD ");

    // Keywords are accepted and show up in FLAGS on the next SELECT
    ok_command(&mut client, "STORE 2 +FLAGS.SILENT (project)");
    let lines = quick_select(&mut client, "Archive");
    assert_has_line(&lines, r"^\* FLAGS \(.*project.*\)$");
    assert_has_line(&lines, r"^\* 0 RECENT$");
}

#[test]
fn copy_messages() {
    let setup = set_up();
    deliver_three(&setup);
    let mut client = setup.connect("messages_copy");
    quick_log_in(&mut client);
    quick_select(&mut client, "Archive");

    ok_command(&mut client, "COPY 1:3 INBOX");
    // The originals stay put with the same UIDs
    let lines = ok_command(&mut client, "FETCH 1:* UID");
    assert_eq!(4, lines.len());
    assert_has_line(&lines, r"^\* 3 FETCH \(UID 3\)$");

    let lines = client.command("COPY 1 Nonesuch").unwrap();
    assert_completion(&lines, r"^NO \[TRYCREATE\]");
    let lines = client.command("COPY 1 /home/cyan/Shared").unwrap();
    assert_completion(&lines, r"^NO \[NOPERM\]");

    let lines = ok_command(&mut client, "STATUS INBOX (MESSAGES UIDNEXT)");
    assert_has_line(&lines, r"^\* STATUS INBOX \(MESSAGES 3 UIDNEXT 4\)$");

    // Flags travel with the copy
    ok_command(&mut client, "EXAMINE INBOX");
    let lines = ok_command(&mut client, "FETCH 1:2 FLAGS");
    assert_has_line(&lines, r"^\* 1 FETCH \(FLAGS \(\\Seen \\Recent\)\)$");
    assert_has_line(&lines, r"^\* 2 FETCH \(FLAGS \(\\Recent\)\)$");

    // Copying into the selected folder shows up like any other new mail
    ok_command(&mut client, "SELECT Archive");
    ok_command(&mut client, "UID COPY 3 Archive");
    poll_until(&mut client, r"^\* 4 EXISTS$");
}

#[test]
fn expunge_and_close() {
    let setup = set_up();
    deliver_three(&setup);
    setup
        .store
        .deliver("azure", "Archive", &[], &message("fourth", "four"));
    let mut client = setup.connect("messages_expunge");
    quick_log_in(&mut client);
    quick_select(&mut client, "Archive");

    ok_command(&mut client, "STORE 1:3 +FLAGS.SILENT (\\Deleted)");
    let lines = ok_command(&mut client, "UID EXPUNGE 2");
    assert_has_line(&lines, r"^\* 2 EXPUNGE$");
    // The expunge alone implies the new count
    assert_no_line(&lines, "EXISTS");
    assert_eq!(2, lines.len());

    let lines = ok_command(&mut client, "EXPUNGE");
    assert_no_line(&lines, "EXISTS");
    // Expunges are reported highest first so the numbering stays valid
    assert_eq!(
        vec!["* 2 EXPUNGE", "* 1 EXPUNGE"],
        matching(&lines, "EXPUNGE")
    );

    let lines = ok_command(&mut client, "FETCH 1:* UID");
    assert_has_line(&lines, r"^\* 1 FETCH \(UID 4\)$");
    assert_eq!(2, lines.len());

    ok_command(&mut client, "STORE 1 +FLAGS.SILENT (\\Deleted)");
    let lines = ok_command(&mut client, "CLOSE");
    assert_no_line(&lines, "EXPUNGE");
    let lines = ok_command(&mut client, "STATUS Archive (MESSAGES)");
    assert_has_line(&lines, r"^\* STATUS Archive \(MESSAGES 0\)$");

    let lines = client.command("EXPUNGE").unwrap();
    assert_completion(&lines, r"^BAD ");
}

#[test]
fn examine_is_read_only() {
    let setup = set_up();
    deliver_three(&setup);
    let mut client = setup.connect("messages_examine");
    quick_log_in(&mut client);

    let lines = ok_command(&mut client, "EXAMINE Archive");
    assert_completion(&lines, r"^OK \[READ-ONLY\]");
    assert_has_line(&lines, r"^\* OK \[PERMANENTFLAGS \(\)\]$");

    let lines = client.command("STORE 1 +FLAGS (\\Deleted)").unwrap();
    assert_completion(&lines, r"^NO \[READ-ONLY\]");
    let lines = client.command("EXPUNGE").unwrap();
    assert_completion(&lines, r"^NO \[READ-ONLY\]");

    // Reading bodies doesn't mark anything \Seen
    ok_command(&mut client, "FETCH 2 BODY[]");
    let lines = ok_command(&mut client, "FETCH 2 FLAGS");
    assert_has_line(&lines, r"^\* 2 FETCH \(FLAGS \(\\Recent\)\)$");

    // Nor does CLOSE expunge anything
    ok_command(&mut client, "CLOSE");
    let lines = ok_command(&mut client, "STATUS Archive (MESSAGES UNSEEN)");
    assert_has_line(
        &lines,
        r"^\* STATUS Archive \(MESSAGES 3 UNSEEN 2\)$",
    );
}

#[test]
fn failed_select_closes_previous() {
    let setup = set_up();
    deliver_three(&setup);
    let mut client = setup.connect("messages_failed_select");
    quick_log_in(&mut client);

    quick_select(&mut client, "Archive");
    ok_command(&mut client, "FETCH 1 FLAGS");

    let lines = client.command("SELECT Nonesuch").unwrap();
    assert_completion(&lines, r"^NO \[NONEXISTENT\]");
    let lines = client.command("FETCH 1 FLAGS").unwrap();
    assert_completion(&lines, r"^BAD .*No mailbox selected");
}
