// app/src/web/routes.rs

use actix_web::web;

use crate::web::handlers::{
  cart_handlers, checkout_handlers, order_handlers, refund_handlers, subscription_handlers, webhook_handlers,
};

async fn health_check_handler() -> actix_web::HttpResponse {
  actix_web::HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

// Called from `main.rs` and from the route tests.
pub fn configure_app_routes(cfg: &mut web::ServiceConfig) {
  cfg.service(
    web::scope("/api/v1")
      .route("/health", web::get().to(health_check_handler))
      .service(
        web::scope("/cart")
          .route("", web::get().to(cart_handlers::view_cart_handler))
          .route("/add", web::post().to(cart_handlers::add_to_cart_handler))
          .route("/{product_id}", web::put().to(cart_handlers::update_quantity_handler))
          .route("/{product_id}", web::delete().to(cart_handlers::remove_item_handler)),
      )
      .service(
        web::scope("/checkout")
          .route("", web::post().to(checkout_handlers::start_checkout_handler))
          .route("/quote", web::get().to(checkout_handlers::quote_handler))
          .route("/stripe/confirm", web::post().to(checkout_handlers::confirm_redirect_handler))
          .route("/nets/poll", web::post().to(checkout_handlers::poll_qr_handler))
          .route("/paypal/capture", web::post().to(checkout_handlers::capture_direct_handler)),
      )
      // `/stats` is registered before `/{order_id}` so it is not parsed as an id.
      .service(
        web::scope("/orders")
          .route("", web::get().to(order_handlers::list_my_orders_handler))
          .route("/stats", web::get().to(order_handlers::order_stats_handler))
          .route("/{order_id}", web::get().to(order_handlers::get_order_handler))
          .route("/{order_id}/refund", web::post().to(refund_handlers::request_refund_handler)),
      )
      .service(
        web::scope("/admin/orders")
          .route("", web::get().to(order_handlers::admin_list_orders_handler))
          .route(
            "/{order_id}/delivery/advance",
            web::post().to(order_handlers::advance_delivery_handler),
          )
          .route(
            "/{order_id}/refund/approve",
            web::post().to(refund_handlers::approve_refund_handler),
          )
          .route(
            "/{order_id}/refund/reject",
            web::post().to(refund_handlers::reject_refund_handler),
          ),
      )
      .service(
        web::scope("/subscription")
          .route("", web::get().to(subscription_handlers::current_subscription_handler))
          .route("", web::post().to(subscription_handlers::subscribe_handler))
          .route("/cancel", web::post().to(subscription_handlers::cancel_subscription_handler)),
      )
      .route("/wallet", web::get().to(subscription_handlers::wallet_handler))
      .service(
        web::scope("/webhooks").route("/stripe", web::post().to(webhook_handlers::stripe_webhook_handler)),
      ),
  );
}
