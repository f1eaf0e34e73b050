use clap::Parser as _;

#[derive(clap::Parser)]
struct Arguments {
  #[clap(flatten)]
  arguments: mhsync::Arguments,
  #[clap(flatten)]
  verbose: clap_verbosity_flag::Verbosity<clap_verbosity_flag::InfoLevel>,
}

fn main() -> anyhow::Result<()> {
  let arguments = Arguments::parse();

  // Stdout carries the IMAP session: the log goes to stderr, nowhere else.
  log4rs::init_config(
    log4rs::config::Config::builder()
      .appender(
        log4rs::config::Appender::builder()
          .filter(Box::new(log4rs::filter::threshold::ThresholdFilter::new(
            arguments.verbose.log_level_filter(),
          )))
          .build(
            "stderr",
            Box::new(
              log4rs::append::console::ConsoleAppender::builder()
                .target(log4rs::append::console::Target::Stderr)
                .encoder(Box::new(log4rs::encode::pattern::PatternEncoder::new(
                  "{d(%F %T)} {l} {t} - {m}{n}",
                )))
                .build(),
            ),
          ),
      )
      .build(
        log4rs::config::Root::builder()
          .appenders(["stderr"])
          .build(log::LevelFilter::Trace),
      )?,
  )?;

  mhsync::run(&arguments.arguments)
}
