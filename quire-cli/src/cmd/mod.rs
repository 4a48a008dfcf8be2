use clap::Arg;

pub mod build;
pub mod serve;

pub fn config_file_arg() -> Arg {
    Arg::new("config_file")
        .short('f')
        .long("config-file")
        .value_name("FILE")
        .help("Site configuration file [default: quire.yml]")
}
