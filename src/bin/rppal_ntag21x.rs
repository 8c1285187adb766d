use core::fmt::Arguments;
use rppal_ntag21x::{error, RppalNtag21xLog, RppalNtag21xTool};
use termion::color;

struct RppalNtag21xLogger;

impl RppalNtag21xLogger {
    fn new() -> RppalNtag21xLogger {
        RppalNtag21xLogger {}
    }
}

impl RppalNtag21xLog for RppalNtag21xLogger {
    fn output(self: &Self, args: Arguments) {
        println!("{}", args);
    }
    fn warning(self: &Self, args: Arguments) {
        eprintln!("{}warning: {}", color::Fg(color::Yellow), args);
    }
    fn error(self: &Self, args: Arguments) {
        eprintln!("{}error: {}", color::Fg(color::Red), args);
    }
}

fn main() {
    let logger = RppalNtag21xLogger::new();

    if let Err(error) = RppalNtag21xTool::new(&logger).run(std::env::args_os()) {
        error!(logger, "{}", error);
        std::process::exit(1);
    }
}
