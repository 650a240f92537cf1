//! Console reporting for pipeline events.

use console::style;
use kcjpm_build::{CompilationEvent, EventObserver};

/// Prints diagnostics and progress as the pipeline emits them.
pub struct ConsoleReporter {
    verbose: bool,
}

impl ConsoleReporter {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl EventObserver for ConsoleReporter {
    fn on_event(&self, event: &CompilationEvent) {
        match event {
            CompilationEvent::CompilationError { diagnostic } => {
                eprintln!("{}: {}", style("error").red().bold(), diagnostic.render());
                if let Some(snippet) = &diagnostic.snippet {
                    eprintln!("{}", style(snippet).dim());
                }
            }
            CompilationEvent::CompilationWarning { diagnostic } => {
                eprintln!(
                    "{}: {}",
                    style("warning").yellow().bold(),
                    diagnostic.render()
                );
            }
            CompilationEvent::PackageCompilationStarted { name } => {
                println!("{} {}", style("Compiling").green().bold(), name);
            }
            CompilationEvent::ChangeDetection { package, change } if change == "NoChanges" => {
                println!("{} {} (up to date)", style("Skipping").cyan(), package);
            }
            CompilationEvent::RawOutput { line, .. } if self.verbose => {
                eprintln!("{}", line);
            }
            CompilationEvent::Progress { message } if self.verbose => {
                println!("{}", style(message).dim());
            }
            _ => {}
        }
    }
}
