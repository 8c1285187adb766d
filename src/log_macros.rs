/// Write formatted output to the `output` method of a logger
#[macro_export]
macro_rules! output {
  ($log: expr, $($args: tt)+) => {
    $log.output(format_args!($($args)+))
  };
}

/// Write formatted output to the `warning` method of a logger
#[macro_export]
macro_rules! warning {
  ($log: expr, $($args: tt)+) => {
    $log.warning(format_args!($($args)+))
  };
}

/// Write formatted output to the `error` method of a logger
#[macro_export]
macro_rules! error {
  ($log: expr, $($args: tt)+) => {
    $log.error(format_args!($($args)+))
  };
}
