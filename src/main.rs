use std::sync::Arc;

use log::info;
use rocket::{launch, routes};

use gtfs_core::config::Config;
use gtfs_core::db;
use gtfs_core::dispatcher::{run_scheduler, WorkerPool};
use gtfs_core::liveupdates::UpdateStore;

mod endpoints;

#[launch]
async fn rocket() -> _ {
    env_logger::init();
    dotenvy::dotenv().ok();

    let config = Config::from_env();
    let pool = db::init_pool(&config)
        .await
        .expect("failed to initialize database pool");

    info!("database ready at {}", config.database_url);

    let workers = WorkerPool::spawn(pool.clone(), 4);
    run_scheduler(pool.clone(), config.clone()).await;

    let update_store = Arc::new(UpdateStore::default());
    gtfs_core::liveupdates::spawn_demo_listener(pool.clone(), update_store.clone());

    rocket::build()
        .manage(pool)
        .manage(config)
        .manage(workers)
        .manage(update_store)
        .mount(
            "/",
            routes![
                endpoints::enqueue_task,
                endpoints::get_task,
                endpoints::cancel_task,
                endpoints::create_agency,
                endpoints::agency_by_id,
                endpoints::feeds_for_agency,
                endpoints::stops_for_feed,
                endpoints::departures_at_stop,
                endpoints::agency_realtime,
                endpoints::queue_delete_feed,
            ],
        )
}
