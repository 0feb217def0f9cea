/*
 * Created on Sun May 09 2021
 *
 * This file is a part of Skytable
 * Skytable (formerly known as TerrabaseDB or Skybase) is a free and open-source
 * NoSQL database written by Sayan Nandan ("the Author") with the
 * vision to provide flexibility in data modelling without compromising
 * on performance, queryability or scalability.
 *
 * Copyright (c) 2021, Sayan Nandan <ohsayan@outlook.com>
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 *
*/

use env_logger::Builder;
use kvd::dbnet::Server;
use kvd::DEFAULT_BIND_ADDR;
use std::env;
use std::process;

fn main() {
    Builder::new()
        .parse_filters(&env::var("KVD_LOG").unwrap_or_else(|_| "info".to_owned()))
        .init();

    log::info!("kvd v{} starting up", libsky::VERSION);

    let mut server = match Server::bind(DEFAULT_BIND_ADDR) {
        Ok(server) => server,
        Err(e) => {
            log::error!("failed to bind {DEFAULT_BIND_ADDR}: {e}");
            process::exit(1);
        }
    };

    log::info!("listening on {DEFAULT_BIND_ADDR}");
    if let Err(e) = server.run() {
        log::error!("event loop terminated: {e}");
        process::exit(1);
    }
}
