// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use hyper::body::Incoming;
use hyper::service::Service;
use hyper::{Request, Response};

use crate::api;
use crate::gateway::GatewayBody;
use crate::state::AppState;

#[derive(Clone)]
pub struct GatewayService {
	state: Arc<AppState>,
}

impl GatewayService {
	pub(crate) fn new(state: Arc<AppState>) -> Self {
		Self { state }
	}
}

impl Service<Request<Incoming>> for GatewayService {
	type Response = Response<GatewayBody>;
	type Error = hyper::Error;
	type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

	fn call(&self, req: Request<Incoming>) -> Self::Future {
		let state = Arc::clone(&self.state);
		Box::pin(async move {
			let (method, path, query, headers, body) = match api::buffer_request_body(req).await {
				Ok(parts) => parts,
				Err(e) => return Err(e),
			};
			Ok(api::route(&state, &method, &path, &query, &headers, body).await)
		})
	}
}
