use std::convert::Infallible;
use std::net::SocketAddr;

use async_graphql_warp::GraphQLResponse;
use warp::Filter;

use crate::api::Schema;

pub(crate) async fn serve(schema: Schema, addr: SocketAddr) {
    let graphql = warp::path("graphql").and(async_graphql_warp::graphql(schema)).and_then(
        |(schema, request): (Schema, async_graphql::Request)| async move {
            Ok::<_, Infallible>(GraphQLResponse::from(schema.execute(request).await))
        },
    );
    warp::serve(graphql).run(addr).await;
}
