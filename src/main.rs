mod api;
mod classifier;
mod database;
mod export;
mod query;
mod settings;
mod web;

use std::process::exit;
use std::sync::Arc;

use chrono::{Local, NaiveDate};
use clap::Parser;
use tracing::info;

use crate::api::Today;
use crate::classifier::Classifier;
use crate::database::Database;
use crate::settings::{Args, Settings};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let settings = match Settings::from_file(&args.config) {
        Ok(ret) => ret,
        Err(error) => {
            eprintln!("Problem while loading settings. {error}");
            exit(1);
        }
    };

    let database = match Database::connect(&settings.storage.path) {
        Ok(ret) => ret,
        Err(error) => {
            eprintln!("Problem while connecting database. {error}");
            exit(1);
        }
    };
    info!("database opened at {}", settings.storage.path.display());

    let environment = match Classifier::create_environment() {
        Ok(ret) => ret,
        Err(error) => {
            eprintln!("Problem while creating model environment. {error}");
            exit(1);
        }
    };
    let classifier = match Classifier::load_model(&settings.model.directory, &environment) {
        Ok(ret) => ret,
        Err(error) => {
            eprintln!("Problem while loading classification model. {error}");
            exit(1);
        }
    };
    info!(
        "classification model loaded from {}",
        settings.model.directory.display()
    );

    let schema = api::schema(
        database,
        Arc::new(classifier),
        settings.model.confidence_threshold,
        Today(today),
    );
    info!("listening on {}", settings.web.address);
    web::serve(schema, settings.web.address).await;
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}
