use std::sync::Arc;

use anyhow::{bail, Result};
use gamescript::{Event, EventEngine, LanguageEngine, Value};

const STEP_EVENTS: [&str; 3] = ["begin_step", "normal_step", "end_step"];

/// One `@on <event>` section of a play file.
#[derive(Debug, PartialEq)]
pub struct Section {
    pub event: String,
    /// Padded with blank lines so compile errors report file line numbers.
    pub source: String,
}

pub fn parse_sections(source: &str) -> Result<Vec<Section>> {
    let mut sections: Vec<Section> = vec![];

    for (index, line) in source.lines().enumerate() {
        let trimmed = line.trim();
        let header = trimmed
            .strip_prefix("@on")
            .filter(|rest| rest.is_empty() || rest.starts_with(char::is_whitespace));
        if let Some(event) = header {
            let event = event.trim();
            if event.is_empty() || event.contains(char::is_whitespace) {
                bail!("line {}: expected `@on <event>`", index + 1);
            }
            sections.push(Section {
                event: event.to_string(),
                source: "\n".repeat(index + 1),
            });
            continue;
        }

        match sections.last_mut() {
            Some(section) => {
                section.source.push_str(line);
                section.source.push('\n');
            }
            None if trimmed.is_empty() || trimmed.starts_with('#') => {}
            None => bail!("line {}: code before the first `@on <event>` section", index + 1),
        }
    }

    Ok(sections)
}

/// Subscribe one instance to every section, fire `create`, then run the
/// step events for `ticks` game-loop ticks.
pub fn run(engine: Arc<LanguageEngine>, source: &str, ticks: usize) -> Result<()> {
    let sections = parse_sections(source)?;
    let mut events = EventEngine::new(engine);
    let instance = events.add_instance();

    for section in sections {
        let block = events.language().compile(&section.source)?;
        events.subscribe(&section.event, instance, Arc::new(block))?;
    }

    let mut failures = events.trigger(Event::new("create"))?.failures.len();
    for tick in 0..ticks {
        for name in STEP_EVENTS {
            events.queue_event(Event::new(name).with_parameter("tick", Value::from(tick as i64)));
        }
        failures += events.process_queue()?.failures.len();
    }

    println!("instance {}:", instance);
    if let Some(symbols) = events.symbols(instance) {
        print!("{}", symbols);
    }
    if !events.globals().is_empty() {
        println!("globals:");
        print!("{}", events.globals());
    }
    if failures > 0 {
        println!("{} handler failure(s), see the log", failures);
    }
    Ok(())
}
