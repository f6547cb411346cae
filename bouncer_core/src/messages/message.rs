use bouncer_macros::define_messages;

define_messages! {
    Notice => { (source, target, text: &str) => ":{source} NOTICE {target} :{text}" },
    Join => { (source, chan: &str) => ":{source} JOIN {chan}" },
    Nick => { (source, nick: &str) => ":{source} NICK :{nick}" },
}
