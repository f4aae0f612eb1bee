use std::io::{self, BufRead, Write};

use crate::roles::RoleProviderPair;

pub fn read_from_stdin(prompt: &str) -> String {
    let stdin = io::stdin();
    let mut text = String::new();
    while text.trim().is_empty() {
        print!("{}: ", prompt);
        io::stdout().flush().unwrap();
        text.clear();
        stdin
            .lock()
            .read_line(&mut text)
            .expect("Could not read input");
    }
    text.trim().to_string()
}

pub fn read_password_from_stdin(prompt: &str) -> String {
    loop {
        print!("{}: ", prompt);
        io::stdout().flush().unwrap();

        let pass = rpassword::read_password().unwrap();

        if pass.trim().is_empty() {
            continue;
        }
        return pass.trim().to_string();
    }
}

pub fn read_passcode_from_stdin() -> String {
    read_from_stdin("Duo passcode")
}

/// Lets the user pick one of the resolved roles by index.
pub fn pick_role<'a>(pairs: &'a [RoleProviderPair]) -> &'a RoleProviderPair {
    if pairs.len() == 1 {
        return &pairs[0];
    }
    loop {
        for (index, pair) in pairs.iter().enumerate() {
            println!("{}) {}", index, pair.role_arn);
        }
        let answer = read_from_stdin("Role");
        if let Ok(index) = answer.parse::<usize>() {
            if index < pairs.len() {
                return &pairs[index];
            }
        }
        println!("Invalid selection: {}", answer);
    }
}
