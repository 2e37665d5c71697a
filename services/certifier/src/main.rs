use chrono::{TimeZone, Utc};
use clap::{App, Arg, SubCommand};
use conduit::ca::database::{ClientRecord, Database};
use conduit::ca::server::CaServer;
use ferrite::crypto;
use ferrite::logging;
use std::fs;
use std::io::BufRead;
use std::path::Path;
use std::process;

fn main() {
    let matches = App::new("Certifier Service")
        .version("1.0")
        .author("Conduit Works")
        .about("Runs the certificate authority and manages its enrollment database.")
        .subcommand(
            SubCommand::with_name("enroll")
                .about("Registers a client in the enrollment database")
                .arg(
                    Arg::with_name("DB_FILE")
                        .help("Path to the database snapshot")
                        .required(true),
                )
                .arg(Arg::with_name("ID").help("Client id").required(true))
                .arg(
                    Arg::with_name("PASSWORD")
                        .help("Client password")
                        .required(true),
                ),
        )
        .subcommand(
            SubCommand::with_name("remove")
                .about("Removes a client from the enrollment database")
                .arg(
                    Arg::with_name("DB_FILE")
                        .help("Path to the database snapshot")
                        .required(true),
                )
                .arg(Arg::with_name("ID").help("Client id").required(true)),
        )
        .subcommand(
            SubCommand::with_name("list")
                .about("Prints the enrollment table")
                .arg(
                    Arg::with_name("DB_FILE")
                        .help("Path to the database snapshot")
                        .required(true),
                ),
        )
        .subcommand(
            SubCommand::with_name("serve")
                .about("Starts the issuing server")
                .arg(
                    Arg::with_name("ADDRESS")
                        .help("ip:port to listen on")
                        .required(true),
                )
                .arg(
                    Arg::with_name("KEY_FILE")
                        .help("Path to the authority private key (PEM)")
                        .required(true),
                )
                .arg(
                    Arg::with_name("DB_FILE")
                        .help("Path to the database snapshot")
                        .required(true),
                ),
        )
        .get_matches();

    match matches.subcommand() {
        ("enroll", Some(sub)) => enroll(
            sub.value_of("DB_FILE").unwrap(),
            sub.value_of("ID").unwrap(),
            sub.value_of("PASSWORD").unwrap(),
        ),
        ("remove", Some(sub)) => remove(
            sub.value_of("DB_FILE").unwrap(),
            sub.value_of("ID").unwrap(),
        ),
        ("list", Some(sub)) => list(sub.value_of("DB_FILE").unwrap()),
        ("serve", Some(sub)) => serve(
            sub.value_of("ADDRESS").unwrap(),
            sub.value_of("KEY_FILE").unwrap(),
            sub.value_of("DB_FILE").unwrap(),
        ),
        _ => {
            eprintln!("No command given; see --help");
            process::exit(2);
        }
    }
}

fn load_database(db_file: &str) -> Database {
    let mut database = Database::new();

    if Path::new(db_file).exists() {
        if let Err(err) = database.load(db_file) {
            eprintln!("Failed loading database `{}`: {}", db_file, err);
            process::exit(1);
        }
    }

    database
}

fn save_database(database: &mut Database, db_file: &str) {
    if let Err(err) = database.save_to_file(Some(db_file)) {
        eprintln!("Failed saving database `{}`: {}", db_file, err);
        process::exit(1);
    }
}

fn enroll(db_file: &str, id: &str, password: &str) {
    let mut database = load_database(db_file);

    if database.exist(id) {
        eprintln!("Client `{}` is already enrolled", id);
        process::exit(1);
    }

    database.add(ClientRecord::new(id, password, None));
    save_database(&mut database, db_file);

    println!("Enrolled `{}` ({} clients total)", id, database.len());
}

fn remove(db_file: &str, id: &str) {
    let mut database = load_database(db_file);

    match database.remove(id) {
        Some(_) => {
            save_database(&mut database, db_file);
            println!("Removed `{}` ({} clients remain)", id, database.len());
        }
        None => {
            eprintln!("Client `{}` is not enrolled", id);
            process::exit(1);
        }
    }
}

fn list(db_file: &str) {
    let database = load_database(db_file);

    println!(
        "{:<24} {:<10} {:<26} {}",
        "id", "status", "valid until", "last access"
    );
    for record in database.iter() {
        let status = if record.is_active { "active" } else { "inactive" };
        let valid_until = record
            .validity
            .map(|validity| render_timestamp(validity.not_after_ms))
            .unwrap_or_else(|| "-".to_string());

        println!(
            "{:<24} {:<10} {:<26} {}",
            record.id,
            status,
            valid_until,
            render_timestamp(record.access_time)
        );
    }
}

fn render_timestamp(millis: i64) -> String {
    Utc.timestamp_millis_opt(millis)
        .single()
        .map(|time| time.to_rfc3339())
        .unwrap_or_else(|| "-".to_string())
}

fn serve(address: &str, key_file: &str, db_file: &str) {
    let logger = logging::init();

    let pem = match fs::read_to_string(key_file) {
        Ok(pem) => pem,
        Err(err) => {
            eprintln!("Failed reading key file `{}`: {}", key_file, err);
            process::exit(1);
        }
    };

    let key = match crypto::import_private_pem(&pem) {
        Ok(key) => key,
        Err(err) => {
            eprintln!("Failed parsing key file `{}`: {}", key_file, err);
            process::exit(1);
        }
    };

    let database = load_database(db_file);

    let server = match CaServer::bind(address, key, database, &logger) {
        Ok(server) => server,
        Err(err) => {
            eprintln!("Failed binding `{}`: {}", address, err);
            process::exit(1);
        }
    };

    let handle = match server.start() {
        Ok(handle) => handle,
        Err(err) => {
            eprintln!("Failed starting accept loop: {}", err);
            process::exit(1);
        }
    };

    logging::info!(logger, "authority listening"; "address" => %address);
    println!("Listening on {}; type `stop` to shut down", address);

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        match line {
            Ok(command) if command.trim() == "stop" => break,
            Ok(_) => println!("Unknown command; type `stop` to shut down"),
            Err(_) => break,
        }
    }

    server.stop();
    if handle.join().is_err() {
        eprintln!("Accept loop terminated abnormally");
        process::exit(1);
    }

    // Validity windows and access times mutate during issuance; persist
    // them on the way out.
    let database = server.database();
    let mut database = database.lock().expect("Authority database poisoned");
    if let Err(err) = database.save_to_file(Some(db_file)) {
        eprintln!("Failed saving database `{}`: {}", db_file, err);
        process::exit(1);
    }

    logging::info!(logger, "authority stopped");
}
