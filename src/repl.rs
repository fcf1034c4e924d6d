use std::{
    io::{self, Write},
    sync::Arc,
};

use anyhow::Result;
use gamescript::{LanguageEngine, Session};

const BANNER: &str = r#"
  gamescript: one line per statement, `:symbols` to list variables, `:quit` to leave
"#;

pub fn start(engine: Arc<LanguageEngine>) -> Result<()> {
    let mut session = Session::new(engine);
    println!("{}", BANNER);

    loop {
        print!(">>");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            return Ok(());
        }

        match input.trim() {
            ":quit" => return Ok(()),
            ":symbols" => {
                print!("{}", session.symbols());
                continue;
            }
            _ => {}
        }

        match session.run(&input) {
            Ok(Some(value)) => println!("{}", value),
            Ok(None) => {}
            Err(err) => {
                println!("Woops! {}", err);
                continue;
            }
        }

        for event in session.take_events() {
            println!("triggered {}", event);
        }
    }
}
