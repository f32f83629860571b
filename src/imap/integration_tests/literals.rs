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

fn read_until(client: &mut PipeClient, tag: &str) -> Vec<String> {
    client
        .read_until_tagged(tag)
        .unwrap()
        .into_iter()
        .map(|line| String::from_utf8_lossy(&line).into_owned())
        .collect()
}

#[test]
fn synchronising_literals() {
    let setup = set_up();
    let mut client = setup.connect("literals_sync");
    skip_greeting(&mut client);

    client.write_raw(b"A1 LOGIN {5}\r\n").unwrap();
    assert_eq!(b"+ go".to_vec(), client.read_response().unwrap());
    client.write_raw(b"azure {7}\r\n").unwrap();
    assert_eq!(b"+ go".to_vec(), client.read_response().unwrap());
    client.write_raw(b"hunter2\r\n").unwrap();

    let lines = read_until(&mut client, "A1");
    assert_completion(&lines, r"^OK .*User login");
}

#[test]
fn non_synchronising_literals() {
    let setup = set_up();
    let mut client = setup.connect("literals_nonsync");
    skip_greeting(&mut client);

    client
        .write_raw(b"A1 LOGIN {5+}\r\nazure {7+}\r\nhunter2\r\nA2 NOOP\r\n")
        .unwrap();
    let lines = read_until(&mut client, "A1");
    assert_completion(&lines, r"^OK ");
    let lines = read_until(&mut client, "A2");
    assert_ok(&lines);

    // Literal content is opaque, line breaks and all
    let lines = append(&mut client, "Archive", "", b"a\r\n)\r\nA9 LOGOUT\r\n");
    assert_ok(&lines);
    let lines = ok_command(&mut client, "STATUS Archive (MESSAGES)");
    assert_has_line(&lines, r"^\* STATUS Archive \(MESSAGES 1\)$");
}

#[test]
fn oversized_literals() {
    let setup = set_up();
    let mut client = setup.connect("literals_toobig");
    quick_log_in(&mut client);

    // A synchronising literal is refused before the client sends it
    let too_big = MAX_LITERAL + 1;
    client
        .write_raw(format!("A1 APPEND Archive {{{}}}\r\n", too_big).as_bytes())
        .unwrap();
    let lines = read_until(&mut client, "A1");
    assert_completion(&lines, r"^NO \[TOOBIG\] Literal too big$");

    // A non-synchronising one has already been sent, so it is swallowed
    // along with the rest of the command.
    let mut command =
        format!("A2 APPEND Archive {{{}+}}\r\n", too_big).into_bytes();
    command.extend(std::iter::repeat(b'x').take(too_big as usize));
    command.extend_from_slice(b"\r\nA3 NOOP\r\n");
    client.write_raw(&command).unwrap();
    let lines = read_until(&mut client, "A2");
    assert_completion(&lines, r"^NO \[TOOBIG\]");
    let lines = read_until(&mut client, "A3");
    assert_ok(&lines);

    let lines = ok_command(&mut client, "STATUS Archive (MESSAGES)");
    assert_has_line(&lines, r"\(MESSAGES 0\)");

    // The limit itself is fine
    let lines = append(
        &mut client,
        "Archive",
        "",
        &vec![b'y'; MAX_LITERAL as usize],
    );
    assert_ok(&lines);
}

#[test]
fn overlong_lines() {
    let setup = set_up();
    let mut client = setup.connect("literals_longline");
    quick_log_in(&mut client);

    let mut command = b"A1 NOOP ".to_vec();
    command.extend(std::iter::repeat(b'x').take(MAX_LINE * 2));
    command.extend_from_slice(b"\r\nA2 NOOP\r\n");
    client.write_raw(&command).unwrap();
    let lines = read_until(&mut client, "A1");
    assert_completion(&lines, r"^NO Command line too long$");
    let lines = read_until(&mut client, "A2");
    assert_ok(&lines);

    // Literals outside APPEND count towards the line length
    let mut command =
        format!("A3 LOGIN {{{}+}}\r\n", MAX_LINE + 1).into_bytes();
    command.extend(std::iter::repeat(b'z').take(MAX_LINE + 1));
    command.extend_from_slice(b" hunter2\r\nA4 NOOP\r\n");
    client.write_raw(&command).unwrap();
    let lines = read_until(&mut client, "A3");
    assert_completion(&lines, r"^NO Command line too long$");
    let lines = read_until(&mut client, "A4");
    assert_ok(&lines);
}
